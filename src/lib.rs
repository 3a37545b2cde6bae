//! tokenwatch - Token analytics library
//!
//! Live transaction feed, top-holder ranking, reward projections and wallet
//! lookup for one tracked token, over a rate-limited blockchain data API.

pub mod config;
pub mod format;
pub mod governor;
pub mod metrics;
pub mod store;
pub mod types;
pub mod upstream;

pub mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use governor::{CallHandle, GovernorConfig, RequestGovernor, RetryPolicy, UpstreamError};
pub use store::{DashboardState, DashboardStore, PollerHandle, TransactionWindow};
pub use upstream::UpstreamClient;
