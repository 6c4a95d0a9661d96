use std::future::Future;
use std::time::{Duration, Instant};

/// Poll `action` until `predicate` holds or `timeout` passes.
///
/// Returns the first satisfying result, or `None` on timeout.
pub async fn wait_for_result<F, Fut, T, P>(
    mut action: F,
    predicate: P,
    timeout: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let interval = Duration::from_millis(20);

    while start.elapsed() < timeout {
        let result = action().await;
        if predicate(&result) {
            return Some(result);
        }
        tokio::time::sleep(interval).await;
    }
    None
}

/// Poll an async condition until it holds or `timeout` passes.
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    wait_for_result(condition, |done| *done, timeout)
        .await
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_for_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = wait_for_result(
            || {
                let calls = calls.clone();
                async move { calls.fetch_add(1, Ordering::SeqCst) + 1 }
            },
            |n| *n >= 3,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result, Some(3));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        assert!(!wait_for(|| async { false }, Duration::from_millis(50)).await);
    }
}
