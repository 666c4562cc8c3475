//! Rotation-based retry across the endpoint pool.
//!
//! One call, many attempts: each attempt targets the next endpoint in the
//! snapshot (`attempt % len`), runs under its own timeout, and failures wait
//! a fixed delay before the next attempt. A `limit` of zero means "as many
//! attempts as there are endpoints", so every endpoint gets exactly one shot.

use std::time::Duration;

use alloy::{network::Network, providers::RootProvider, transports::TransportResult};
use tokio::time::{sleep, timeout};

use super::{
    errors::{CoreError, should_retry},
    registry::Endpoint,
};

/// Attempt budget and pacing for first-success dispatch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Total attempts; 0 substitutes the pool size at call time.
    pub(crate) limit: u32,
    /// Budget for a single attempt.
    pub(crate) attempt_timeout: Duration,
    /// Pause between consecutive attempts.
    pub(crate) delay: Duration,
}

/// Drives `op` against the endpoint snapshot until it succeeds, a
/// non-retryable error appears, or the attempt budget runs out.
///
/// Only the final attempt's error is returned; earlier failures are logged.
/// Callers cancel by dropping the returned future.
pub(crate) async fn retry<N, T, F, Fut>(
    policy: RetryPolicy,
    endpoints: &[Endpoint<N>],
    op: F,
) -> Result<T, CoreError>
where
    N: Network,
    F: Fn(RootProvider<N>) -> Fut,
    Fut: Future<Output = TransportResult<T>>,
{
    debug_assert!(!endpoints.is_empty(), "dispatch must check for an empty pool");

    let limit = match policy.limit {
        0 => endpoints.len(),
        n => n as usize,
    };

    let mut attempt = 0_usize;
    let mut failures: Vec<String> = Vec::new();
    loop {
        let endpoint = &endpoints[attempt % endpoints.len()];

        let err = match timeout(policy.attempt_timeout, op(endpoint.provider.clone())).await {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    debug!(
                        url = %endpoint.url,
                        attempts = attempt + 1,
                        "call succeeded after failover"
                    );
                }
                return Ok(value);
            }
            Ok(Err(rpc_err)) => {
                if !should_retry(&rpc_err) {
                    trace!(url = %endpoint.url, error = %rpc_err, "non-retryable error");
                    return Err(CoreError::Rpc(rpc_err));
                }
                CoreError::Rpc(rpc_err)
            }
            Err(_elapsed) => CoreError::Timeout,
        };

        warn!(url = %endpoint.url, attempt, error = %err, "attempt failed");
        failures.push(format!("{}: {err}", endpoint.url));

        attempt += 1;
        if attempt >= limit {
            debug!(failures = ?failures, "every attempt failed");
            return Err(err);
        }

        sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use alloy::transports::{RpcError, TransportErrorKind};
    use tokio::time::Instant;

    use super::*;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint {
                url: Arc::from(format!("http://127.0.0.1:854{i}")),
                provider: RootProvider::new_http(
                    format!("http://127.0.0.1:854{i}").parse().unwrap(),
                ),
            })
            .collect()
    }

    fn policy(limit: u32) -> RetryPolicy {
        RetryPolicy {
            limit,
            attempt_timeout: Duration::from_secs(5),
            delay: Duration::from_millis(100),
        }
    }

    fn transport_err() -> RpcError<TransportErrorKind> {
        RpcError::Transport(TransportErrorKind::custom_str("connection refused"))
    }

    fn not_found_err() -> RpcError<TransportErrorKind> {
        RpcError::ErrorResp(alloy::rpc::json_rpc::ErrorPayload {
            code: -32000,
            message: "header not found".into(),
            data: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_rotating_past_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = retry(policy(0), &endpoints(3), move |_provider| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 { Err(transport_err()) } else { Ok(42_u64) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limit_means_one_attempt_per_endpoint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry(policy(0), &endpoints(4), move |_provider| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(transport_err()) }
        })
        .await;

        assert!(matches!(result, Err(CoreError::Rpc(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_limit_caps_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry(policy(2), &endpoints(5), move |_provider| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(transport_err()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_rotation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry(policy(0), &endpoints(3), move |_provider| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(not_found_err()) }
        })
        .await;

        assert!(matches!(result, Err(CoreError::Rpc(RpcError::ErrorResp(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let result: Result<(), _> = retry(policy(1), &endpoints(1), |_provider| async {
            std::future::pending().await
        })
        .await;

        assert!(matches!(result, Err(CoreError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_separates_attempts() {
        let start = Instant::now();

        let result: Result<(), _> = retry(policy(3), &endpoints(1), |_provider| async {
            Err(transport_err())
        })
        .await;

        assert!(result.is_err());
        // Two inter-attempt delays of 100ms each (virtual time)
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
    }
}
