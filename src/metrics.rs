//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Governor counters
    pub calls_submitted_total: IntCounter,
    pub calls_failed_total: IntCounter,
    pub retries_total: IntCounter,
    pub rate_limited_total: IntCounter,
    pub batches_total: IntCounter,

    // Store counters
    pub static_refreshes_total: IntCounter,
    pub static_refresh_failures_total: IntCounter,
    pub transaction_polls_total: IntCounter,
    pub transactions_merged_total: IntCounter,
    pub soft_fallbacks_total: IntCounter,

    // Gauges
    pub queue_depth: IntGauge,
    pub window_size: IntGauge,

    // Histograms
    pub call_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let calls_submitted_total = IntCounter::with_opts(Opts::new(
            "upstream_calls_submitted_total",
            "Upstream calls submitted to the governor",
        ))?;

        let calls_failed_total = IntCounter::with_opts(Opts::new(
            "upstream_calls_failed_total",
            "Upstream calls that failed after exhausting retries",
        ))?;

        let retries_total = IntCounter::with_opts(Opts::new(
            "upstream_retries_total",
            "Retry attempts issued by the retry policy",
        ))?;

        let rate_limited_total = IntCounter::with_opts(Opts::new(
            "upstream_rate_limited_total",
            "Attempts rejected by the upstream as rate limited",
        ))?;

        let batches_total = IntCounter::with_opts(Opts::new(
            "governor_batches_total",
            "Batches executed by the governor drain loop",
        ))?;

        let static_refreshes_total = IntCounter::with_opts(Opts::new(
            "static_refreshes_total",
            "Successful static snapshot refreshes",
        ))?;

        let static_refresh_failures_total = IntCounter::with_opts(Opts::new(
            "static_refresh_failures_total",
            "Static snapshot refreshes that kept the previous snapshot",
        ))?;

        let transaction_polls_total = IntCounter::with_opts(Opts::new(
            "transaction_polls_total",
            "Transaction polls completed",
        ))?;

        let transactions_merged_total = IntCounter::with_opts(Opts::new(
            "transactions_merged_total",
            "New transactions prepended to the window",
        ))?;

        let soft_fallbacks_total = IntCounter::with_opts(Opts::new(
            "soft_fallbacks_total",
            "Queries that returned their fallback value",
        ))?;

        let queue_depth = IntGauge::with_opts(Opts::new(
            "governor_queue_depth",
            "Calls waiting in the governor queue",
        ))?;

        let window_size = IntGauge::with_opts(Opts::new(
            "transaction_window_size",
            "Transactions currently held in the window",
        ))?;

        let call_latency = Histogram::with_opts(
            HistogramOpts::new("upstream_call_seconds", "Governed call latency including retries")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(calls_submitted_total.clone()))?;
        registry.register(Box::new(calls_failed_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(batches_total.clone()))?;
        registry.register(Box::new(static_refreshes_total.clone()))?;
        registry.register(Box::new(static_refresh_failures_total.clone()))?;
        registry.register(Box::new(transaction_polls_total.clone()))?;
        registry.register(Box::new(transactions_merged_total.clone()))?;
        registry.register(Box::new(soft_fallbacks_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(window_size.clone()))?;
        registry.register(Box::new(call_latency.clone()))?;

        Ok(Self {
            registry,
            calls_submitted_total,
            calls_failed_total,
            retries_total,
            rate_limited_total,
            batches_total,
            static_refreshes_total,
            static_refresh_failures_total,
            transaction_polls_total,
            transactions_merged_total,
            soft_fallbacks_total,
            queue_depth,
            window_size,
            call_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}
