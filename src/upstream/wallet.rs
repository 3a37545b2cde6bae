//! Wallet lookup derivation. Pure: every input is already fetched.

use crate::config::RewardConfig;
use crate::types::{TokenAccountBalance, TokenSupply, TopHolder, TransactionRecord, WalletInfo};

/// Inputs for [`derive_wallet_info`]
#[derive(Debug, Clone, Copy)]
pub struct WalletInputs<'a> {
    pub address: &'a str,
    pub tracked_mint: &'a str,
    pub token_accounts: &'a [TokenAccountBalance],
    pub history: &'a [TransactionRecord],
    pub holders: &'a [TopHolder],
    pub supply: &'a TokenSupply,
}

/// Build a [`WalletInfo`] from a wallet's token accounts and history.
///
/// Balance only counts positive accounts of the tracked mint. Activity
/// counts every transaction touching the wallet; volume only counts
/// tracked-mint transfers the wallet is party to.
pub fn derive_wallet_info(inputs: WalletInputs<'_>, rewards: &RewardConfig) -> WalletInfo {
    let WalletInputs {
        address,
        tracked_mint,
        token_accounts,
        history,
        holders,
        supply,
    } = inputs;

    let accounts: Vec<&TokenAccountBalance> = token_accounts
        .iter()
        .filter(|a| a.mint == tracked_mint && a.balance > 0.0)
        .collect();
    let balance: f64 = accounts.iter().map(|a| a.balance).sum();

    let total_supply = supply.whole_tokens();
    let percentage = if total_supply > 0.0 {
        balance / total_supply * 100.0
    } else {
        0.0
    };

    let rank = holders
        .iter()
        .find(|h| h.matches(address) || accounts.iter().any(|a| h.token_account == a.account))
        .map(|h| h.rank);
    let is_top_holder = rank.is_some_and(|r| r <= rewards.top_holder_cutoff);

    let touching: Vec<&TransactionRecord> = history.iter().filter(|tx| tx.involves(address)).collect();
    let last_transaction = touching.iter().map(|tx| tx.timestamp).filter(|t| *t > 0).max();

    let amounts: Vec<f64> = touching
        .iter()
        .flat_map(|tx| tx.transfers_of(tracked_mint))
        .filter(|t| t.involves(address))
        .map(|t| t.amount.abs())
        .collect();
    let total_volume: f64 = amounts.iter().sum();
    let average_transfer = if amounts.is_empty() {
        0.0
    } else {
        total_volume / amounts.len() as f64
    };

    let projected_daily_reward = total_supply
        * rewards.daily_turnover_rate
        * rewards.swap_fee_rate
        * rewards.lp_fee_share
        * percentage
        / 100.0;

    WalletInfo {
        address: address.to_string(),
        balance,
        percentage,
        rank,
        is_top_holder,
        transaction_count: touching.len(),
        last_transaction,
        total_volume,
        average_transfer,
        projected_daily_reward,
        token_accounts: accounts.len(),
    }
}
