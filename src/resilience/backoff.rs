//! Jittered waits and fixed-delay retries.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Random duration in `[0, max)`.
///
/// Spreads periodic polls of many processes so they do not hit the source together.
pub fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}

/// Run `op` until it succeeds, sleeping `delay` after each failure.
pub async fn retry_fixed<T, E, F, Fut>(what: &str, delay: Duration, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return value,
            Err(e) => {
                tracing::warn!(attempt, delay = ?delay, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(50)) < Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn test_retry_fixed_until_success() {
        let calls = AtomicU32::new(0);
        let value = retry_fixed("flaky op", Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("not yet")
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
