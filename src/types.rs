//! Common types used throughout the application
//!
//! Every record here is built once from an upstream response and never
//! mutated afterwards. Optional upstream fields are defaulted to `0`, an
//! empty string or an empty list at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Classified transaction type as reported by the enhanced-transactions API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Swap,
    Transfer,
    Burn,
    Mint,
    AddLiquidity,
    WithdrawLiquidity,
    /// Any other classified type, kept verbatim
    Other(String),
    /// The upstream could not classify the transaction
    Unknown,
}

impl TransactionKind {
    /// Map an upstream `type` string
    pub fn from_upstream(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "UNKNOWN" => Self::Unknown,
            "SWAP" => Self::Swap,
            "TRANSFER" => Self::Transfer,
            "BURN" | "BURN_NFT" => Self::Burn,
            "TOKEN_MINT" | "MINT" => Self::Mint,
            "ADD_LIQUIDITY" => Self::AddLiquidity,
            "WITHDRAW_LIQUIDITY" | "REMOVE_LIQUIDITY" => Self::WithdrawLiquidity,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Swap => "SWAP",
            Self::Transfer => "TRANSFER",
            Self::Burn => "BURN",
            Self::Mint => "TOKEN_MINT",
            Self::AddLiquidity => "ADD_LIQUIDITY",
            Self::WithdrawLiquidity => "WITHDRAW_LIQUIDITY",
            Self::Other(name) => name,
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// SPL token movement inside a transaction (amount in whole-token units)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub from_user: String,
    pub to_user: String,
    pub mint: String,
    pub amount: f64,
}

impl TokenTransfer {
    pub fn involves(&self, address: &str) -> bool {
        self.from_user == address || self.to_user == address
    }
}

/// Native SOL movement inside a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub from_user: String,
    pub to_user: String,
    pub lamports: u64,
}

impl NativeTransfer {
    pub fn involves(&self, address: &str) -> bool {
        self.from_user == address || self.to_user == address
    }
}

/// Normalized on-chain transaction. Identity is the signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub signature: String,
    /// Block time, unix seconds
    pub timestamp: i64,
    /// Fee in lamports
    pub fee: u64,
    pub fee_payer: String,
    pub kind: TransactionKind,
    /// Program or venue that produced the transaction (e.g. "RAYDIUM")
    pub source: String,
    pub description: String,
    pub token_transfers: Vec<TokenTransfer>,
    pub native_transfers: Vec<NativeTransfer>,
}

impl TransactionRecord {
    /// A record is worth showing only if it is described, classified and
    /// moves something.
    pub fn is_meaningful(&self) -> bool {
        !self.description.trim().is_empty()
            && self.kind != TransactionKind::Unknown
            && (!self.token_transfers.is_empty() || !self.native_transfers.is_empty())
    }

    /// True when the address paid the fee or is a party to any transfer
    pub fn involves(&self, address: &str) -> bool {
        self.fee_payer == address
            || self.token_transfers.iter().any(|t| t.involves(address))
            || self.native_transfers.iter().any(|t| t.involves(address))
    }

    /// Transfers of one specific mint
    pub fn transfers_of<'a>(&'a self, mint: &'a str) -> impl Iterator<Item = &'a TokenTransfer> + 'a {
        self.token_transfers.iter().filter(move |t| t.mint == mint)
    }
}

/// Token supply as returned by `getTokenSupply`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenSupply {
    /// Raw base-unit amount
    pub amount: u64,
    pub decimals: u8,
    /// Amount in whole tokens
    pub ui_amount: f64,
}

impl TokenSupply {
    pub fn zero(decimals: u8) -> Self {
        Self {
            amount: 0,
            decimals,
            ui_amount: 0.0,
        }
    }

    /// Supply expressed in whole tokens, derived from the raw amount when
    /// the upstream omitted the ui amount
    pub fn whole_tokens(&self) -> f64 {
        if self.ui_amount > 0.0 {
            self.ui_amount
        } else {
            self.amount as f64 / 10f64.powi(self.decimals as i32)
        }
    }
}

/// One entry of the top-holders ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopHolder {
    /// 1-based position in the ranking
    pub rank: usize,
    /// Wallet owning the token account (falls back to the token account
    /// when the owner could not be resolved)
    pub owner: String,
    pub token_account: String,
    /// Balance in whole tokens
    pub balance: f64,
    /// Share of the total supply, 0..=100
    pub percentage: f64,
}

impl TopHolder {
    pub fn matches(&self, address: &str) -> bool {
        self.owner == address || self.token_account == address
    }
}

/// Merged on-chain / off-chain token metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    pub image: String,
    pub description: String,
    pub decimals: u8,
}

/// Reward / tokenomics projection for the tracked token
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RewardMetrics {
    /// Total supply in whole tokens
    pub total_supply: f64,
    /// Assumed daily traded volume (total supply × turnover rate)
    pub daily_volume: f64,
    /// Swap fees generated by the daily volume
    pub daily_fees: f64,
    /// Portion of the fees distributed to liquidity providers
    pub daily_reward_pool: f64,
    /// Sum of tracked-token transfer amounts in the recent history
    pub observed_volume: f64,
    pub observed_transfers: usize,
    pub average_transfer: f64,
    pub transaction_count: usize,
    /// USD per whole token, 0 when no quote was available
    pub usd_rate: f64,
    pub daily_reward_pool_usd: f64,
}

/// Result of a wallet lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    /// Balance across all positive token accounts, whole tokens
    pub balance: f64,
    /// Share of supply, 0..=100
    pub percentage: f64,
    pub rank: Option<usize>,
    pub is_top_holder: bool,
    pub transaction_count: usize,
    /// Unix seconds of the most recent transaction involving the wallet
    pub last_transaction: Option<i64>,
    /// Sum of absolute tracked-token transfer amounts
    pub total_volume: f64,
    pub average_transfer: f64,
    pub projected_daily_reward: f64,
    pub token_accounts: usize,
}

/// Balance of one token account owned by a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAccountBalance {
    pub account: String,
    pub mint: String,
    /// Whole-token balance
    pub balance: f64,
}

/// Static data refreshed together every few minutes. Always replaced as a
/// whole, never field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSnapshot {
    pub metrics: RewardMetrics,
    pub supply: TokenSupply,
    pub holders: Vec<TopHolder>,
    pub token_metadata: TokenMetadata,
    pub refreshed_at: SystemTime,
}
