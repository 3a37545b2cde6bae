//! Dashboard Store - polled state with snapshot semantics
//!
//! Two independent loops feed one reactive state:
//! - a static refresh (metadata, supply, holders, reward metrics) replacing
//!   the whole [`StaticSnapshot`] at once, or keeping the previous one on
//!   failure
//! - a transaction poll merging fresh pages into the [`TransactionWindow`]
//!
//! Readers subscribe to a `watch` channel. A poll that changes nothing does
//! not wake them.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub mod window;

pub use window::TransactionWindow;

use crate::config::PollingConfig;
use crate::governor::UpstreamError;
use crate::metrics::metrics;
use crate::types::{RewardMetrics, StaticSnapshot, TokenMetadata, TokenSupply, TopHolder, WalletInfo};
use crate::upstream::UpstreamClient;

/// Reactive dashboard state
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    /// Latest successful static refresh
    pub snapshot: Option<Arc<StaticSnapshot>>,
    pub transactions: TransactionWindow,
    /// Set until the first static refresh attempt completes
    pub loading: bool,
    /// Message of the most recent failed static refresh, cleared on success
    pub error: Option<String>,
}

impl DashboardState {
    fn new(window_capacity: usize) -> Self {
        Self {
            snapshot: None,
            transactions: TransactionWindow::new(window_capacity),
            loading: true,
            error: None,
        }
    }

    pub fn metrics(&self) -> Option<&RewardMetrics> {
        self.snapshot.as_ref().map(|s| &s.metrics)
    }

    pub fn supply(&self) -> Option<&TokenSupply> {
        self.snapshot.as_ref().map(|s| &s.supply)
    }

    pub fn holders(&self) -> &[TopHolder] {
        self.snapshot.as_ref().map_or(&[], |s| s.holders.as_slice())
    }

    pub fn token_metadata(&self) -> Option<&TokenMetadata> {
        self.snapshot.as_ref().map(|s| &s.token_metadata)
    }
}

/// Owns the polling loops and the state they publish
pub struct DashboardStore {
    client: UpstreamClient,
    config: PollingConfig,
    state: watch::Sender<DashboardState>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for DashboardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardStore")
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl DashboardStore {
    pub fn new(client: UpstreamClient, config: PollingConfig) -> Self {
        let (state, _) = watch::channel(DashboardState::new(config.window_capacity));
        let (shutdown, _) = watch::channel(false);
        Self {
            client,
            config,
            state,
            shutdown,
        }
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    /// Clone of the current state
    pub fn state(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop both loops. Requests already in flight complete, but their
    /// results are discarded.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Dashboard store shutting down");
        }
    }

    /// Spawn the static refresh and transaction poll loops. Both fire
    /// immediately, then on their own intervals.
    pub fn start(self: Arc<Self>) -> PollerHandle {
        let static_loop = tokio::spawn(Arc::clone(&self).run_static_loop());
        let poll_loop = tokio::spawn(Arc::clone(&self).run_poll_loop());
        info!(
            static_refresh_secs = self.config.static_refresh_secs,
            transaction_poll_secs = self.config.transaction_poll_secs,
            "Dashboard store started"
        );
        PollerHandle {
            store: self,
            tasks: vec![static_loop, poll_loop],
        }
    }

    async fn run_static_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(Duration::from_secs(self.config.static_refresh_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {
                    // Failures are recorded in the state.
                    let _ = self.refresh_static().await;
                }
            }
        }
        debug!("Static refresh loop stopped");
    }

    async fn run_poll_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(Duration::from_secs(self.config.transaction_poll_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut limit = self.config.initial_transaction_limit;

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_transactions(limit).await {
                        warn!(limit, error = %e, "Transaction poll failed");
                    }
                    limit = self.config.transaction_limit;
                }
            }
        }
        debug!("Transaction poll loop stopped");
    }

    async fn load_snapshot(&self) -> Result<StaticSnapshot, UpstreamError> {
        let hard = async {
            let supply = self.client.fetch_token_supply().await?;
            let (holders, metrics) = tokio::try_join!(
                self.client.fetch_top_holders(&supply, self.config.holder_limit),
                self.client.reward_metrics(&supply)
            )?;
            Ok::<_, UpstreamError>((supply, holders, metrics))
        };
        let (token_metadata, hard) = tokio::join!(self.client.token_metadata(), hard);
        let (supply, holders, metrics) = hard?;

        Ok(StaticSnapshot {
            metrics,
            supply,
            holders,
            token_metadata,
            refreshed_at: SystemTime::now(),
        })
    }

    /// Fetch every static field and publish them as one snapshot.
    ///
    /// On failure the previous snapshot stays in place and `error` is set.
    /// Either way `loading` is cleared. After shutdown nothing is published,
    /// but a failed fetch is still returned as an error.
    pub async fn refresh_static(&self) -> Result<(), UpstreamError> {
        let outcome = self.load_snapshot().await.map(Arc::new);

        let shutdown = &self.shutdown;
        let published = self.state.send_if_modified(|state| {
            if *shutdown.borrow() {
                return false;
            }
            match &outcome {
                Ok(snapshot) => {
                    state.snapshot = Some(Arc::clone(snapshot));
                    state.error = None;
                }
                Err(e) => state.error = Some(e.to_string()),
            }
            state.loading = false;
            true
        });

        if !published {
            debug!("Dropping static refresh result after shutdown");
            return outcome.map(|_| ());
        }

        let m = metrics();
        match outcome {
            Ok(snapshot) => {
                info!(
                    holders = snapshot.holders.len(),
                    supply = snapshot.supply.whole_tokens(),
                    reward_pool = snapshot.metrics.daily_reward_pool,
                    "Static snapshot refreshed"
                );
                m.static_refreshes_total.inc();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Static refresh failed, keeping previous snapshot");
                m.static_refresh_failures_total.inc();
                Err(e)
            }
        }
    }

    /// Fetch the newest `limit` transactions and merge them into the window.
    /// Returns how many were added; subscribers are only notified when that
    /// is non-zero.
    pub async fn poll_transactions(&self, limit: usize) -> Result<usize, UpstreamError> {
        let fetched = self.client.recent_transactions(limit).await?;
        metrics().transaction_polls_total.inc();

        let mut added = 0;
        let shutdown = &self.shutdown;
        self.state.send_if_modified(|state| {
            if *shutdown.borrow() {
                return false;
            }
            added = state.transactions.merge(fetched);
            metrics().window_size.set(state.transactions.len() as i64);
            added > 0
        });

        if added > 0 {
            metrics().transactions_merged_total.inc_by(added as u64);
            debug!(added, limit, "Merged new transactions");
        }
        Ok(added)
    }

    /// Wallet lookup against the current snapshot, fetching supply and
    /// holders directly when no snapshot exists yet.
    pub async fn lookup_wallet(&self, address: &str) -> Result<WalletInfo, UpstreamError> {
        let snapshot = self.state.borrow().snapshot.clone();
        match snapshot {
            Some(snapshot) => {
                self.client
                    .fetch_wallet_info(address, &snapshot.holders, &snapshot.supply)
                    .await
            }
            None => {
                let supply = self.client.token_supply().await;
                let holders = self.client.top_holders(&supply, self.config.holder_limit).await;
                self.client.fetch_wallet_info(address, &holders, &supply).await
            }
        }
    }
}

/// Running loops of a started store. Dropping the handle stops them.
#[must_use = "dropping the handle stops polling"]
pub struct PollerHandle {
    store: Arc<DashboardStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn store(&self) -> &Arc<DashboardStore> {
        &self.store
    }

    pub fn shutdown(&self) {
        self.store.shutdown();
    }

    /// Signal shutdown and wait for both loops to exit
    pub async fn join(mut self) {
        self.store.shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "Polling loop ended abnormally");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.store.shutdown();
    }
}

/// Resolves once the shutdown flag is set (or its sender is gone).
/// Yields `()` so no `watch::Ref` is held inside a `select!` output.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
