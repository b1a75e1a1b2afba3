use super::config::RetryPolicy;
use std::future::Future;
use tracing::{debug, warn};

/// Run `operation` until it reports success or the policy runs out of attempts.
///
/// `operation` receives the 0-based attempt number. Between failed attempts the task
/// sleeps for [`RetryPolicy::backoff`]. Returns whether any attempt succeeded.
pub async fn retry_until_success<F, Fut>(policy: RetryPolicy, mut operation: F) -> bool
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..policy.max_attempts {
        if operation(attempt).await {
            if attempt > 0 {
                debug!("✅ RETRY: succeeded on attempt {}", attempt + 1);
            }
            return true;
        }

        if attempt + 1 < policy.max_attempts {
            let delay = policy.backoff(attempt);
            debug!("🔁 RETRY: attempt {} failed, waiting {:?}", attempt + 1, delay);
            tokio::time::sleep(delay).await;
        }
    }

    warn!("❌ RETRY: gave up after {} attempts", policy.max_attempts);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let ok = retry_until_success(RetryPolicy::immediate(5), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { attempt == 3 }
        })
        .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let ok = retry_until_success(RetryPolicy::immediate(3), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backs_off_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        let started = tokio::time::Instant::now();

        let ok = retry_until_success(policy, |attempt| async move { attempt == 2 }).await;

        assert!(ok);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }
}
