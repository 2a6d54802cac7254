/// Integration tests for resilience library
use resilience::{
    retry::{with_retry_if, RetryConfig, RetryError},
    timeout::{with_timeout, TimeoutError},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum OriginFailure {
    Unavailable,
    NotFound,
}

impl std::fmt::Display for OriginFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginFailure::Unavailable => write!(f, "unavailable"),
            OriginFailure::NotFound => write!(f, "not found"),
        }
    }
}

// ==================== Retry + Timeout Tests ====================

#[tokio::test(start_paused = true)]
async fn test_transient_then_permanent_failure_stops_retrying() {
    let config = RetryConfig {
        max_retries: 5,
        initial_backoff: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    };
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result: Result<(), _> = with_retry_if(
        config,
        move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(OriginFailure::Unavailable)
                } else {
                    Err(OriginFailure::NotFound)
                }
            }
        },
        |e| *e == OriginFailure::Unavailable,
    )
    .await;

    assert!(matches!(
        result,
        Err(RetryError::OperationFailed(OriginFailure::NotFound))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_bounded_inside_timeout() {
    let config = RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(100),
        jitter: false,
        ..Default::default()
    };

    // 100 + 200 + 400 = 700ms of backoff, longer than the caller is willing to wait
    let result = with_timeout(
        Duration::from_millis(250),
        with_retry_if(
            config,
            || async { Err::<(), _>(OriginFailure::Unavailable) },
            |_| true,
        ),
    )
    .await;

    assert!(matches!(result, Err(TimeoutError::Elapsed(_))));
}
