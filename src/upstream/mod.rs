//! Upstream client: domain queries over the governed transport.
//!
//! Every request goes through the shared [`RequestGovernor`]. Queries come
//! in two flavours:
//! - `fetch_*` returns `Result` and leaves the decision to the caller
//! - the soft variant logs the failure and returns a neutral fallback
//!
//! `recent_transactions` and `reward_metrics` are hard only: an empty feed or
//! zeroed metrics would be indistinguishable from real data.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

pub mod parse;
pub mod rewards;
pub mod transport;
pub mod wallet;

pub use rewards::derive_reward_metrics;
pub use transport::{HttpTransport, Query, Transport};
pub use wallet::{derive_wallet_info, WalletInputs};

use crate::config::Config;
use crate::governor::{CallHandle, RequestGovernor, UpstreamError};
use crate::metrics::metrics;
use crate::types::{
    RewardMetrics, TokenAccountBalance, TokenMetadata, TokenSupply, TopHolder, TransactionRecord, WalletInfo,
};

/// Maximum page size accepted by the address-transactions endpoint
const MAX_PAGE_LIMIT: usize = 100;

/// Reject anything that is not a base58 public key before it reaches a URL
pub fn validate_address(address: &str) -> Result<Pubkey, UpstreamError> {
    Pubkey::from_str(address.trim()).map_err(|_| UpstreamError::InvalidAddress(address.to_string()))
}

/// Log a failed soft query and substitute its fallback
fn soft<T>(query: &'static str, result: Result<T, UpstreamError>, fallback: impl FnOnce() -> T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(query, error = %e, "Query failed, using fallback");
            metrics().soft_fallbacks_total.inc();
            fallback()
        }
    }
}

/// Client for the tracked token's upstream data
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    governor: RequestGovernor,
    config: Arc<Config>,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("governor", &self.governor)
            .field("mint", &self.config.token.mint)
            .finish_non_exhaustive()
    }
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn Transport>, governor: RequestGovernor, config: Config) -> Self {
        Self {
            transport,
            governor,
            config: Arc::new(config),
        }
    }

    /// HTTP transport and governor built from `config`
    pub fn from_config(config: Config) -> Result<Self, UpstreamError> {
        let transport = HttpTransport::new(&config.upstream)?;
        let governor = RequestGovernor::new(config.governor_config(), config.retry_policy());
        Ok(Self::new(Arc::new(transport), governor, config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn governor(&self) -> &RequestGovernor {
        &self.governor
    }

    fn mint(&self) -> &str {
        &self.config.token.mint
    }

    // ------------------------------------------------------------------
    // Governed primitives
    // ------------------------------------------------------------------

    pub fn rpc_call(&self, method: &'static str, params: Value) -> CallHandle<Value> {
        let transport = Arc::clone(&self.transport);
        self.governor.submit(method, move || {
            let transport = Arc::clone(&transport);
            let params = params.clone();
            async move { transport.rpc(method, params).await }
        })
    }

    pub fn rest_get(&self, name: &'static str, path: String, query: Query) -> CallHandle<Value> {
        let transport = Arc::clone(&self.transport);
        self.governor.submit(name, move || {
            let transport = Arc::clone(&transport);
            let path = path.clone();
            let query = query.clone();
            async move { transport.rest_get(&path, query).await }
        })
    }

    pub fn rest_post(&self, name: &'static str, path: String, body: Value) -> CallHandle<Value> {
        let transport = Arc::clone(&self.transport);
        self.governor.submit(name, move || {
            let transport = Arc::clone(&transport);
            let path = path.clone();
            let body = body.clone();
            async move { transport.rest_post(&path, body).await }
        })
    }

    pub fn fetch_url(&self, name: &'static str, url: String, query: Query) -> CallHandle<Value> {
        let transport = Arc::clone(&self.transport);
        self.governor.submit(name, move || {
            let transport = Arc::clone(&transport);
            let url = url.clone();
            let query = query.clone();
            async move { transport.fetch_url(&url, query).await }
        })
    }

    // ------------------------------------------------------------------
    // Token metadata
    // ------------------------------------------------------------------

    pub async fn fetch_token_metadata(&self) -> Result<TokenMetadata, UpstreamError> {
        let body = json!({
            "mintAccounts": [self.mint()],
            "includeOffChain": true,
            "disableCache": false,
        });
        let value = self.rest_post("token_metadata", "/token-metadata".to_string(), body).await?;
        parse::token_metadata(&value, &self.config.token)
    }

    /// Metadata, or the configured name/symbol/decimals on failure
    pub async fn token_metadata(&self) -> TokenMetadata {
        soft("token_metadata", self.fetch_token_metadata().await, || {
            parse::default_metadata(&self.config.token)
        })
    }

    // ------------------------------------------------------------------
    // Supply and holders
    // ------------------------------------------------------------------

    pub async fn fetch_token_supply(&self) -> Result<TokenSupply, UpstreamError> {
        let value = self.rpc_call("getTokenSupply", json!([self.mint()])).await?;
        parse::token_supply(&value)
    }

    pub async fn token_supply(&self) -> TokenSupply {
        soft("token_supply", self.fetch_token_supply().await, || {
            TokenSupply::zero(self.config.token.decimals)
        })
    }

    /// Largest token accounts, ranked, with owners resolved where possible.
    /// An owner lookup failure keeps the token account as the holder address.
    pub async fn fetch_top_holders(&self, supply: &TokenSupply, limit: usize) -> Result<Vec<TopHolder>, UpstreamError> {
        let value = self.rpc_call("getTokenLargestAccounts", json!([self.mint()])).await?;
        let mut accounts = parse::largest_accounts(&value)?;
        accounts.truncate(limit);
        if accounts.is_empty() {
            return Ok(Vec::new());
        }

        let addresses: Vec<&str> = accounts.iter().map(|a| a.address.as_str()).collect();
        let owners = match self
            .rpc_call("getMultipleAccounts", json!([addresses, {"encoding": "jsonParsed"}]))
            .await
            .and_then(|v| parse::account_owners(&v))
        {
            Ok(owners) => owners,
            Err(e) => {
                warn!(error = %e, "Owner resolution failed, ranking token accounts");
                metrics().soft_fallbacks_total.inc();
                Vec::new()
            }
        };

        let total = supply.whole_tokens();
        Ok(accounts
            .into_iter()
            .enumerate()
            .map(|(i, account)| {
                let owner = owners
                    .get(i)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| account.address.clone());
                TopHolder {
                    rank: i + 1,
                    owner,
                    token_account: account.address,
                    balance: account.balance,
                    percentage: if total > 0.0 { account.balance / total * 100.0 } else { 0.0 },
                }
            })
            .collect())
    }

    pub async fn top_holders(&self, supply: &TokenSupply, limit: usize) -> Vec<TopHolder> {
        soft("top_holders", self.fetch_top_holders(supply, limit).await, Vec::new)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    async fn address_transactions(
        &self,
        name: &'static str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, UpstreamError> {
        let path = format!("/addresses/{}/transactions", address);
        let query = vec![("limit".to_string(), limit.clamp(1, MAX_PAGE_LIMIT).to_string())];
        let value = self.rest_get(name, path, query).await?;
        parse::enhanced_transactions(name, value)
    }

    /// Newest enhanced transactions of the tracked mint.
    ///
    /// When the REST API stays rate limited after retries, the same page is
    /// rebuilt from plain RPC data instead.
    pub async fn recent_transactions(&self, limit: usize) -> Result<Vec<TransactionRecord>, UpstreamError> {
        let mint = self.mint().to_string();
        match self.address_transactions("recent_transactions", &mint, limit).await {
            Ok(records) => Ok(records),
            Err(e) if e.is_rate_limited() => {
                warn!(error = %e, "Enhanced API rate limited, falling back to RPC parsing");
                metrics().soft_fallbacks_total.inc();
                self.rpc_transactions(&mint, limit).await
            }
            Err(e) => Err(e),
        }
    }

    /// Transactions of `address` rebuilt from `getSignaturesForAddress` and
    /// `getTransaction`. Individual transaction failures are skipped.
    pub async fn rpc_transactions(&self, address: &str, limit: usize) -> Result<Vec<TransactionRecord>, UpstreamError> {
        let value = self
            .rpc_call("getSignaturesForAddress", json!([address, {"limit": limit}]))
            .await?;
        let signatures = parse::signatures(&value)?;

        let handles: Vec<_> = signatures
            .iter()
            .map(|sig| {
                self.rpc_call(
                    "getTransaction",
                    json!([sig, {"encoding": "jsonParsed", "maxSupportedTransactionVersion": 0}]),
                )
            })
            .collect();

        let mut records = Vec::with_capacity(signatures.len());
        for (sig, result) in signatures.iter().zip(join_all(handles).await) {
            match result {
                Ok(tx) => records.extend(parse::basic_transaction(sig, &tx, self.mint())),
                Err(e) => debug!(signature = %sig, error = %e, "Skipping transaction"),
            }
        }
        Ok(records)
    }

    /// Parse signatures through the enhanced API in sequential sub-batches.
    ///
    /// A rate-limited sub-batch ends the run early and the records gathered
    /// so far are returned. Any other failure skips that sub-batch.
    pub async fn parse_transactions(&self, signatures: &[String]) -> Vec<TransactionRecord> {
        let size = self.config.parsing.sub_batch_size.max(1);
        let delay = Duration::from_millis(self.config.parsing.sub_batch_delay_ms);
        let mut records = Vec::with_capacity(signatures.len());

        for (index, chunk) in signatures.chunks(size).enumerate() {
            if index > 0 {
                tokio::time::sleep(delay).await;
            }

            let body = json!({ "transactions": chunk });
            let result = self
                .rest_post("parse_transactions", "/transactions".to_string(), body)
                .await
                .and_then(|v| parse::enhanced_transactions("parse_transactions", v));

            match result {
                Ok(parsed) => records.extend(parsed),
                Err(e) if e.is_rate_limited() => {
                    warn!(
                        sub_batch = index,
                        parsed = records.len(),
                        error = %e,
                        "Rate limited while parsing, returning partial results"
                    );
                    break;
                }
                Err(e) => {
                    warn!(sub_batch = index, error = %e, "Sub-batch failed, skipping");
                }
            }
        }

        records
    }

    // ------------------------------------------------------------------
    // Wallet lookup
    // ------------------------------------------------------------------

    pub async fn fetch_wallet_transactions(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, UpstreamError> {
        let key = validate_address(address)?;
        self.address_transactions("wallet_transactions", &key.to_string(), limit)
            .await
    }

    pub async fn wallet_transactions(&self, address: &str, limit: usize) -> Vec<TransactionRecord> {
        soft(
            "wallet_transactions",
            self.fetch_wallet_transactions(address, limit).await,
            Vec::new,
        )
    }

    /// Token accounts of `owner` holding the tracked mint
    pub async fn fetch_token_accounts(&self, owner: &str) -> Result<Vec<TokenAccountBalance>, UpstreamError> {
        let key = validate_address(owner)?;
        let value = self
            .rpc_call(
                "getTokenAccountsByOwner",
                json!([key.to_string(), {"mint": self.mint()}, {"encoding": "jsonParsed"}]),
            )
            .await?;
        parse::token_accounts(&value)
    }

    /// Wallet lookup. Token accounts are required; a failed history fetch
    /// only zeroes the activity figures.
    pub async fn fetch_wallet_info(
        &self,
        address: &str,
        holders: &[TopHolder],
        supply: &TokenSupply,
    ) -> Result<WalletInfo, UpstreamError> {
        let key = validate_address(address)?.to_string();
        let limit = self.config.polling.wallet_history_limit;

        let (accounts, history) = tokio::join!(
            self.fetch_token_accounts(&key),
            self.wallet_transactions(&key, limit)
        );
        let accounts = accounts?;

        let info = derive_wallet_info(
            WalletInputs {
                address: &key,
                tracked_mint: self.mint(),
                token_accounts: &accounts,
                history: &history,
                holders,
                supply,
            },
            &self.config.rewards,
        );
        info!(
            wallet = %key,
            balance = info.balance,
            rank = ?info.rank,
            transactions = info.transaction_count,
            "Wallet lookup complete"
        );
        Ok(info)
    }

    pub async fn wallet_info(&self, address: &str, holders: &[TopHolder], supply: &TokenSupply) -> Option<WalletInfo> {
        soft(
            "wallet_info",
            self.fetch_wallet_info(address, holders, supply).await.map(Some),
            || None,
        )
    }

    // ------------------------------------------------------------------
    // Pricing and rewards
    // ------------------------------------------------------------------

    /// USD per whole tracked token, from a quote for exactly one token
    pub async fn fetch_usd_rate(&self) -> Result<f64, UpstreamError> {
        let upstream = &self.config.upstream;
        if self.mint() == upstream.usd_mint {
            return Ok(1.0);
        }

        let one_token = 10u64.saturating_pow(self.config.token.decimals as u32);
        let query = vec![
            ("inputMint".to_string(), self.mint().to_string()),
            ("outputMint".to_string(), upstream.usd_mint.clone()),
            ("amount".to_string(), one_token.to_string()),
            ("slippageBps".to_string(), upstream.slippage_bps.to_string()),
        ];
        let value = self.fetch_url("usd_quote", upstream.quote_url.clone(), query).await?;
        parse::quote_out_amount(&value, upstream.usd_decimals)
    }

    pub async fn usd_rate(&self) -> f64 {
        soft("usd_rate", self.fetch_usd_rate().await, || 0.0)
    }

    /// Reward projection for `supply`. Fails when the recent history cannot
    /// be fetched; a missing USD quote only zeroes the USD figures.
    pub async fn reward_metrics(&self, supply: &TokenSupply) -> Result<RewardMetrics, UpstreamError> {
        let (history, usd_rate) = tokio::join!(
            self.recent_transactions(self.config.polling.metrics_history_limit),
            self.usd_rate()
        );
        let history = history?;
        Ok(derive_reward_metrics(
            supply,
            &history,
            self.mint(),
            usd_rate,
            &self.config.rewards,
        ))
    }
}
