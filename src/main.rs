//! tokenwatch - headless token dashboard
//!
//! Polls the configured token's holders, supply, reward projections and
//! recent transactions, and logs every state change. `--wallet` performs a
//! single wallet lookup instead.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenwatch::format::{
    format_compact, format_lamports_to_sol, format_number, format_percentage, format_time_ago,
    format_timestamp, format_token_amount, format_usd, shorten_address,
};
use tokenwatch::metrics::metrics;
use tokenwatch::types::WalletInfo;
use tokenwatch::{Config, DashboardState, DashboardStore, UpstreamClient};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Look up one wallet and exit
    #[arg(short, long, env = "TOKENWATCH_WALLET")]
    wallet: Option<String>,

    /// Run one refresh and one transaction poll, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.json_logs)?;

    info!("Starting tokenwatch {}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {}", args.config);
    let config = load_config(&args.config)?;
    info!(
        mint = %config.token.mint,
        symbol = %config.token.symbol,
        rpc = %config.upstream.rpc_url,
        "Tracking token"
    );

    let enable_metrics = config.monitoring.enable_metrics;
    let polling = config.polling.clone();
    let client = UpstreamClient::from_config(config).context("Failed to create upstream client")?;
    let store = Arc::new(DashboardStore::new(client, polling));

    if let Some(address) = args.wallet.as_deref() {
        let info = store
            .lookup_wallet(address)
            .await
            .with_context(|| format!("Wallet lookup failed for {}", address))?;
        log_wallet(&info);
        return Ok(());
    }

    if args.once {
        if let Err(e) = store.refresh_static().await {
            error!(error = %e, "Static refresh failed");
        }
        let limit = store.client().config().polling.initial_transaction_limit;
        if let Err(e) = store.poll_transactions(limit).await {
            error!(error = %e, "Transaction poll failed");
        }
        log_state(&store.state(), enable_metrics);
        return Ok(());
    }

    let updates = store.subscribe();
    let handle = Arc::clone(&store).start();
    run_event_loop(updates, enable_metrics).await;

    info!("Shutting down gracefully...");
    handle.join().await;
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "tokenwatch=debug,info"
    } else {
        "tokenwatch=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        Config::from_env().context("Invalid configuration from environment")
    }
}

/// Log every published state until ctrl-c
async fn run_event_loop(mut updates: watch::Receiver<DashboardState>, enable_metrics: bool) {
    info!("Event loop started");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Dashboard store dropped, stopping");
                    break;
                }
                let state = updates.borrow_and_update().clone();
                log_state(&state, enable_metrics);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn log_state(state: &DashboardState, enable_metrics: bool) {
    if state.loading {
        info!("Loading...");
    }
    if let Some(err) = &state.error {
        warn!("Last refresh failed: {}", err);
    }

    if let Some(snapshot) = &state.snapshot {
        let meta = &snapshot.token_metadata;
        let m = &snapshot.metrics;
        info!("{} ({})", meta.name, meta.symbol);
        info!(
            "   Supply: {} ({})",
            format_token_amount(snapshot.supply.amount, snapshot.supply.decimals, 0),
            format_compact(snapshot.supply.whole_tokens())
        );
        info!(
            "   Daily volume: {}  fees: {}  reward pool: {} ({})",
            format_compact(m.daily_volume),
            format_number(m.daily_fees, 2),
            format_number(m.daily_reward_pool, 2),
            format_usd(m.daily_reward_pool_usd)
        );
        info!(
            "   Observed: {} transfers, {} volume, {} average",
            m.observed_transfers,
            format_compact(m.observed_volume),
            format_number(m.average_transfer, 2)
        );
        for holder in snapshot.holders.iter().take(10) {
            info!(
                "   #{:<3} {}  {}  {}",
                holder.rank,
                shorten_address(&holder.owner, 4),
                format_compact(holder.balance),
                format_percentage(holder.percentage)
            );
        }
    }

    let now = unix_now();
    info!("Recent transactions: {}", state.transactions.len());
    for tx in state.transactions.iter().take(5) {
        info!(
            "   {} {:<10} {}  fee {} SOL  {}",
            shorten_address(&tx.signature, 6),
            tx.kind,
            format_time_ago(tx.timestamp, now),
            format_lamports_to_sol(tx.fee),
            tx.description
        );
    }

    if enable_metrics {
        match metrics().render() {
            Ok(text) => info!("Metrics:\n{}", text),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }
    }
}

fn log_wallet(info: &WalletInfo) {
    info!("Wallet {}", info.address);
    info!(
        "   Balance: {} ({}) across {} accounts",
        format_number(info.balance, 2),
        format_percentage(info.percentage),
        info.token_accounts
    );
    match info.rank {
        Some(rank) => info!("   Rank: #{}{}", rank, if info.is_top_holder { " (top holder)" } else { "" }),
        None => info!("   Rank: not ranked"),
    }
    info!(
        "   Activity: {} transactions, last {}",
        info.transaction_count,
        info.last_transaction
            .map(|ts| format!("{} ({})", format_timestamp(ts), format_time_ago(ts, unix_now())))
            .unwrap_or_else(|| "never".to_string())
    );
    info!(
        "   Volume: {} total, {} average",
        format_number(info.total_volume, 2),
        format_number(info.average_transfer, 2)
    );
    info!("   Projected daily reward: {}", format_number(info.projected_daily_reward, 4));
}
