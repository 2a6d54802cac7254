/// Resilience patterns for calls that leave the process
///
/// - **Retry**: Exponential backoff with jitter, gated by a retry predicate so
///   only transient failures are retried
/// - **Timeout**: Time limits on external calls and on callers waiting for them
///
/// # Example: retry only transient failures
///
/// ```rust,no_run
/// use resilience::{with_retry_if, RetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_retry_if(
///         RetryConfig::default(),
///         || async { Err::<(), _>("503 from origin".to_string()) },
///         |err: &String| err.starts_with('5'),
///     )
///     .await;
///     assert!(result.is_err());
/// }
/// ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, TimeoutError};
