//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Publishing is never
//! retried here; these cover broker connection and subscription restoration.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for the initial broker connection at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Backoff for restoring a lost consumer subscription.
///
/// Unbounded: a consumer keeps trying until it is stopped.
///
/// - Min delay: 100ms
/// - Max delay: 30s
/// - Jitter enabled
pub fn reconnect_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(30))
        .without_max_times()
        .with_jitter()
}

/// Upper bound used when a backoff iterator runs dry.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_connection_backoff_is_bounded() {
        let delays: Vec<_> = connection_backoff().build().collect();
        assert_eq!(delays.len(), 30);
        // Jitter adds at most the current delay on top.
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
    }

    #[test]
    fn test_reconnect_backoff_keeps_going() {
        let mut backoff = reconnect_backoff().build();
        for _ in 0..100 {
            assert!(backoff.next().is_some());
        }
    }
}
