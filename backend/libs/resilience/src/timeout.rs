/// Timeout wrapper for async operations
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    #[error("Operation timed out after {0:?}")]
    Elapsed(Duration),
}

/// Execute a future with timeout
///
/// Dropping the future on timeout only stops *this* caller from waiting;
/// work the future merely observes (e.g. a spawned task) keeps running.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::Elapsed(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapsed() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(matches!(result, Err(TimeoutError::Elapsed(d)) if d == Duration::from_millis(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_cancel_spawned_work() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            7
        });
        let waiter = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        };

        assert!(with_timeout(Duration::from_millis(10), waiter).await.is_err());
        assert_eq!(handle.await.unwrap(), 7);
    }
}
