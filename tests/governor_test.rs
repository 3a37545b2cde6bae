//! Integration tests for the request governor
//!
//! These tests drive the governor through its public API with a paused
//! clock and check batching, concurrency and retry behaviour end to end.

#[cfg(test)]
mod governor_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokenwatch::{GovernorConfig, RequestGovernor, RetryPolicy, UpstreamError};

    fn governor() -> RequestGovernor {
        RequestGovernor::new(GovernorConfig::default(), RetryPolicy::new(3, Duration::from_millis(1000)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_batch_size() {
        let gov = governor();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        // Submit through several clones; they all feed one queue.
        let handles: Vec<_> = (0..23)
            .map(|i| {
                let gov = gov.clone();
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                gov.submit("concurrency", move || {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, UpstreamError>(i)
                    }
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        assert_eq!(results.len(), 23);
        assert!(results.iter().enumerate().all(|(i, r)| *r == Ok(i)));
        assert_eq!(peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_gives_up_after_three_attempts() {
        let gov = governor();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let started = tokio::time::Instant::now();

        let result = gov
            .submit("always_limited", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(UpstreamError::RateLimited {
                        endpoint: "rpc".to_string(),
                        message: "429 Too Many Requests".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(UpstreamError::RateLimited { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1000ms + 2000ms floors, each with under a second of jitter
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_does_not_stall_queue() {
        let gov = governor();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        drop(gov.submit("abandoned", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, UpstreamError>(()) }
        }));

        assert_eq!(gov.submit("next", || async { Ok::<_, UpstreamError>(9) }).await, Ok(9));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
