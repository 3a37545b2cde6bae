//! Request Governor
//!
//! Turns bursts of upstream calls into fixed-size concurrent batches with a
//! pause between batches, and retries each call on its own according to a
//! shared [`RetryPolicy`].
//!
//! - `submit` only enqueues; nothing runs on the caller's stack
//! - one drain loop at a time, started on demand by `submit`
//! - a batch is awaited as a whole before the next one starts
//! - a failing or panicking call only affects its own caller

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub mod errors;
pub mod retry;

pub use errors::UpstreamError;
pub use retry::{RateLimitDetector, RetryPolicy};

use crate::metrics::metrics;

/// Batching parameters
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Calls executed concurrently per batch
    pub batch_size: usize,
    /// Pause between batches while work remains queued
    pub batch_delay: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_millis(200),
        }
    }
}

/// A pending unit of work: runs the operation (with retries) and delivers
/// the outcome to its caller. Consumed exactly once by the drain loop.
struct QueuedCall {
    name: &'static str,
    job: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedCall>,
    draining: bool,
}

struct GovernorInner {
    config: GovernorConfig,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
}

/// Shared request governor. Cloning is cheap and every clone feeds the same queue.
#[derive(Clone)]
pub struct RequestGovernor {
    inner: Arc<GovernorInner>,
}

impl std::fmt::Debug for RequestGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGovernor")
            .field("config", &self.inner.config)
            .field("policy", &self.inner.policy)
            .field("queued", &self.queued())
            .finish()
    }
}

impl RequestGovernor {
    pub fn new(config: GovernorConfig, policy: RetryPolicy) -> Self {
        let config = GovernorConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            inner: Arc::new(GovernorInner {
                config,
                policy,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Number of calls waiting for a batch slot
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether a drain loop is currently running
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Queue `operation` and return a handle resolving to its final outcome.
    ///
    /// The operation is a factory so that retries re-execute the underlying
    /// call instead of re-enqueueing it. Must be called within a Tokio runtime.
    pub fn submit<T, F, Fut>(&self, name: &'static str, operation: F) -> CallHandle<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let policy = self.inner.policy.clone();

        let job = async move {
            let started = Instant::now();
            let result = policy.run(name, operation).await;
            let m = metrics();
            m.call_latency.observe(started.elapsed().as_secs_f64());
            if result.is_err() {
                m.calls_failed_total.inc();
            }
            // Receiver gone means the caller stopped waiting; the result is dropped.
            let _ = tx.send(result);
        }
        .boxed();

        let start_drain = {
            let mut state = self.inner.state.lock();
            state.queue.push_back(QueuedCall { name, job });
            metrics().queue_depth.set(state.queue.len() as i64);
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };
        metrics().calls_submitted_total.inc();

        if start_drain {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.drain());
        }

        CallHandle { rx }
    }
}

impl GovernorInner {
    /// Take the next batch, or clear the draining flag when the queue is
    /// empty. Both happen under the same lock so a concurrent `submit` either
    /// sees the flag still set or starts a fresh loop.
    fn next_batch(&self) -> Option<Vec<QueuedCall>> {
        let mut state = self.state.lock();
        if state.queue.is_empty() {
            state.draining = false;
            return None;
        }
        let take = state.queue.len().min(self.config.batch_size);
        let batch: Vec<QueuedCall> = state.queue.drain(..take).collect();
        metrics().queue_depth.set(state.queue.len() as i64);
        Some(batch)
    }

    async fn drain(self: Arc<Self>) {
        while let Some(batch) = self.next_batch() {
            let m = metrics();
            m.batches_total.inc();
            debug!(batch_size = batch.len(), "Executing governed batch");

            let handles: Vec<_> = batch
                .into_iter()
                .map(|call| (call.name, tokio::spawn(call.job)))
                .collect();
            let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();

            for (name, joined) in names.into_iter().zip(join_all(handles).await) {
                if let Err(e) = joined {
                    warn!(operation = name, error = %e, "Governed call aborted");
                }
            }

            let more = !self.state.lock().queue.is_empty();
            if more {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }
        debug!("Governor queue drained");
    }
}

/// Handle returned by [`RequestGovernor::submit`]
#[must_use = "the call's outcome is only observable through its handle"]
pub struct CallHandle<T> {
    rx: oneshot::Receiver<Result<T, UpstreamError>>,
}

impl<T> Future for CallHandle<T> {
    type Output = Result<T, UpstreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(UpstreamError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant as TokioInstant;

    fn governor(batch_size: usize) -> RequestGovernor {
        RequestGovernor::new(
            GovernorConfig {
                batch_size,
                batch_delay: Duration::from_millis(200),
            },
            RetryPolicy::new(3, Duration::from_millis(100)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_does_not_run_inline() {
        let gov = governor(5);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let handle = gov.submit("inline_check", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, UpstreamError>(7) }
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(gov.queued(), 1);
        assert_eq!(handle.await, Ok(7));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_settle_in_order() {
        let gov = governor(5);
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..12u64)
            .map(|i| {
                let log = Arc::clone(&log);
                gov.submit("ordered", move || {
                    let log = Arc::clone(&log);
                    async move {
                        let start = TokioInstant::now();
                        tokio::time::sleep(Duration::from_millis(10 + i * 7)).await;
                        log.lock().push((i, start, TokioInstant::now()));
                        Ok::<_, UpstreamError>(i)
                    }
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await, Ok(i as u64));
        }

        let mut entries = log.lock().clone();
        entries.sort_by_key(|(i, _, _)| *i);
        let batches: Vec<Vec<_>> = entries.chunks(5).map(|c| c.to_vec()).collect();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![5, 5, 2]);

        for batch in &batches {
            let first_start = batch[0].1;
            assert!(batch.iter().all(|(_, start, _)| *start == first_start));
        }
        for pair in batches.windows(2) {
            let previous_end = pair[0].iter().map(|(_, _, end)| *end).max().unwrap();
            let next_start = pair[1][0].1;
            assert!(next_start >= previous_end + Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_isolated_to_its_caller() {
        let gov = governor(5);
        let ok = gov.submit("ok", || async { Ok::<_, UpstreamError>("fine") });
        let bad = gov.submit("bad", || async {
            Err::<&str, _>(UpstreamError::malformed("test", "broken"))
        });
        let ok2 = gov.submit("ok2", || async { Ok::<_, UpstreamError>("also fine") });

        assert_eq!(ok.await, Ok("fine"));
        assert!(matches!(bad.await, Err(UpstreamError::Malformed { .. })));
        assert_eq!(ok2.await, Ok("also fine"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reexecutes_without_reenqueue() {
        let gov = governor(5);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let result = gov
            .submit("always_failing", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(UpstreamError::Transport {
                        endpoint: "rpc".to_string(),
                        message: "reset".to_string(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(UpstreamError::Transport { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(gov.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drain_loop_and_restart() {
        let gov = governor(2);
        let first = gov.submit("a", || async { Ok::<_, UpstreamError>(1) });
        let second = gov.submit("b", || async { Ok::<_, UpstreamError>(2) });
        assert!(gov.is_draining());
        assert_eq!(first.await, Ok(1));
        assert_eq!(second.await, Ok(2));

        // Let the loop observe the empty queue and exit.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!gov.is_draining());

        let third = gov.submit("c", || async { Ok::<_, UpstreamError>(3) });
        assert_eq!(third.await, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_call_yields_cancelled() {
        let gov = governor(5);
        let boom = gov.submit("boom", || async {
            if true {
                panic!("operation blew up");
            }
            Ok::<(), UpstreamError>(())
        });
        let fine = gov.submit("fine", || async { Ok::<_, UpstreamError>(1) });
        assert_eq!(boom.await, Err(UpstreamError::Cancelled));
        assert_eq!(fine.await, Ok(1));
    }
}
