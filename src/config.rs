//! Configuration module for tokenwatch
//!
//! Loads a TOML file, applies `.env` / environment overrides and provides
//! defaults for every field.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::governor::{GovernorConfig, RetryPolicy};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Upstream endpoints
    pub upstream: UpstreamConfig,

    /// Batching and retry parameters
    pub governor: GovernorSettings,

    /// Refresh schedules and window sizing
    pub polling: PollingConfig,

    /// Sub-batching of the enhanced transaction parser
    pub parsing: ParsingConfig,

    /// Tracked token
    pub token: TokenConfig,

    /// Reward projection constants
    pub rewards: RewardConfig,

    /// Monitoring and metrics
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Enhanced transactions REST API base
    pub api_base_url: String,

    /// API key appended as `api-key` query parameter
    pub api_key: Option<String>,

    /// Swap quote endpoint used for USD conversion
    pub quote_url: String,

    /// USD-pegged reference mint
    pub usd_mint: String,

    /// Decimals of the USD reference mint
    pub usd_decimals: u8,

    /// Slippage tolerance for quotes (basis points)
    pub slippage_bps: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorSettings {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Total attempts per call
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    /// Requests per second across all calls, 0 disables
    pub rate_limit_rps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub static_refresh_secs: u64,
    pub transaction_poll_secs: u64,
    /// Limit for the very first transaction poll
    pub initial_transaction_limit: usize,
    pub transaction_limit: usize,
    /// Maximum transactions retained in the window
    pub window_capacity: usize,
    /// Holders requested for the ranking
    pub holder_limit: usize,
    /// Transactions fetched for a wallet lookup
    pub wallet_history_limit: usize,
    /// Transactions used for reward metrics
    pub metrics_history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub sub_batch_size: usize,
    pub sub_batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Fraction of supply assumed to trade per day
    pub daily_turnover_rate: f64,
    /// Swap fee charged per trade
    pub swap_fee_rate: f64,
    /// Share of the swap fee paid to liquidity providers
    pub lp_fee_share: f64,
    /// Ranks up to and including this count as top holders
    pub top_holder_cutoff: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Log the Prometheus text dump on every snapshot change
    pub enable_metrics: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            api_base_url: "https://api.helius.xyz/v0".to_string(),
            api_key: None,
            quote_url: "https://quote-api.jup.ag/v6/quote".to_string(),
            usd_mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            usd_decimals: 6,
            slippage_bps: 50,
            timeout_secs: 30,
        }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay_ms: 200,
            max_retries: 3,
            base_delay_ms: 1000,
            max_jitter_ms: 1000,
            rate_limit_rps: 0,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            static_refresh_secs: 300,
            transaction_poll_secs: 6,
            initial_transaction_limit: 5,
            transaction_limit: 10,
            window_capacity: 50,
            holder_limit: 20,
            wallet_history_limit: 100,
            metrics_history_limit: 100,
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: 3,
            sub_batch_delay_ms: 1000,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            mint: "So11111111111111111111111111111111111111112".to_string(),
            name: "Wrapped SOL".to_string(),
            symbol: "SOL".to_string(),
            decimals: 9,
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            daily_turnover_rate: 0.02,
            swap_fee_rate: 0.0025,
            lp_fee_share: 0.5,
            top_holder_cutoff: 25,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `TOKENWATCH_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("TOKENWATCH_RPC_URL") {
            self.upstream.rpc_url = url;
        }
        if let Ok(url) = std::env::var("TOKENWATCH_API_URL") {
            self.upstream.api_base_url = url;
        }
        if let Ok(key) = std::env::var("TOKENWATCH_API_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Ok(mint) = std::env::var("TOKENWATCH_MINT") {
            self.token.mint = mint;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("upstream.rpc_url", &self.upstream.rpc_url),
            ("upstream.api_base_url", &self.upstream.api_base_url),
            ("upstream.quote_url", &self.upstream.quote_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!("{} is not an http(s) URL: {}", name, url)));
            }
        }

        Pubkey::from_str(&self.token.mint)
            .map_err(|e| ConfigError::Validation(format!("token.mint {}: {}", self.token.mint, e)))?;
        Pubkey::from_str(&self.upstream.usd_mint)
            .map_err(|e| ConfigError::Validation(format!("upstream.usd_mint {}: {}", self.upstream.usd_mint, e)))?;

        if self.governor.batch_size == 0 {
            return Err(ConfigError::Validation("governor.batch_size must be > 0".to_string()));
        }
        if self.governor.max_retries == 0 {
            return Err(ConfigError::Validation("governor.max_retries must be > 0".to_string()));
        }
        if self.parsing.sub_batch_size == 0 {
            return Err(ConfigError::Validation("parsing.sub_batch_size must be > 0".to_string()));
        }
        if self.polling.window_capacity == 0 {
            return Err(ConfigError::Validation("polling.window_capacity must be > 0".to_string()));
        }
        if self.polling.static_refresh_secs == 0 || self.polling.transaction_poll_secs == 0 {
            return Err(ConfigError::Validation("polling intervals must be > 0".to_string()));
        }

        for (name, rate) in [
            ("rewards.daily_turnover_rate", self.rewards.daily_turnover_rate),
            ("rewards.swap_fee_rate", self.rewards.swap_fee_rate),
            ("rewards.lp_fee_share", self.rewards.lp_fee_share),
        ] {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Validation(format!("{} must be within 0..=1, got {}", name, rate)));
            }
        }

        Ok(())
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            batch_size: self.governor.batch_size,
            batch_delay: Duration::from_millis(self.governor.batch_delay_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.governor.max_retries, Duration::from_millis(self.governor.base_delay_ms))
            .with_max_jitter(Duration::from_millis(self.governor.max_jitter_ms))
            .with_requests_per_second(self.governor.rate_limit_rps)
    }
}
