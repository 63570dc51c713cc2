//! Concurrent registry of per-client token buckets.
//!
//! # Get-or-create
//!
//! Lookup and insert happen under one exclusive lock, so two requests from a
//! never-seen client racing each other always end up sharing the same bucket.
//!
//! # Eviction
//!
//! A background sweeper clears the whole map every `sweep_interval`
//! (default: 10 minutes). This bounds memory without per-entry bookkeeping.
//! A client that is mid-throttle when a sweep runs gets a fresh, full bucket
//! on its next request; that is accepted behaviour.
//!
//! Callers that already hold an `Arc<TokenBucket>` keep using it until they
//! drop it; only the map entry is removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::bucket::TokenBucket;
use crate::clock::{Clock, MonotonicClock};
use crate::metrics;

/// Default period between wholesale evictions.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RateLimitError {
    /// Rate must be a finite number greater than zero.
    #[error("rate must be a finite number greater than 0 (got {0}); disable rate limiting instead")]
    InvalidRate(f64),

    /// Burst must allow at least one request.
    #[error("burst must be greater than 0; disable rate limiting instead")]
    ZeroBurst,
}

/// Map from client identity to that client's [`TokenBucket`].
pub struct ClientLimiterRegistry {
    entries: Mutex<HashMap<String, Arc<TokenBucket>>>,
    rate: f64,
    burst: u32,
    clock: Arc<dyn Clock>,
}

impl ClientLimiterRegistry {
    /// Create a registry whose buckets refill at `rate` tokens per second and
    /// hold at most `burst` tokens.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if `rate` is not positive and finite, or if
    /// `burst` is zero.
    pub fn new(rate: f64, burst: u32) -> Result<Self, RateLimitError> {
        Self::with_clock(rate, burst, Arc::new(MonotonicClock))
    }

    /// Same as [`ClientLimiterRegistry::new`] with an explicit clock.
    pub fn with_clock(rate: f64, burst: u32, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RateLimitError::InvalidRate(rate));
        }
        if burst == 0 {
            return Err(RateLimitError::ZeroBurst);
        }

        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            rate,
            burst,
            clock,
        })
    }

    /// Return the bucket for `id`, creating a full one if none exists.
    pub fn get_or_create(&self, id: &str) -> Arc<TokenBucket> {
        let mut entries = self.entries.lock();
        if let Some(bucket) = entries.get(id) {
            return bucket.clone();
        }

        let bucket = Arc::new(TokenBucket::new(self.rate, self.burst, self.clock.clone()));
        entries.insert(id.to_string(), bucket.clone());
        metrics::set_rate_limiter_clients(entries.len());
        bucket
    }

    /// Remove every entry. Returns the number of entries evicted.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let evicted = entries.len();
        // Replace rather than clear so the old allocation is released too.
        *entries = HashMap::new();
        metrics::set_rate_limiter_clients(0);
        evicted
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Configured refill rate (tokens per second).
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Configured bucket capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Spawn the periodic eviction loop on `tracker`.
    ///
    /// The loop stops when `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        sweep_interval: Duration,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) {
        let registry = self.clone();

        tracker.spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limiter sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.sweep();
                        info!(evicted, "Rate limiter registry swept");
                    }
                }
            }

            debug!("Rate limiter sweeper shutting down");
        });
    }
}

impl fmt::Debug for ClientLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientLimiterRegistry")
            .field("clients", &self.len())
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry(rate: f64, burst: u32) -> ClientLimiterRegistry {
        ClientLimiterRegistry::with_clock(rate, burst, Arc::new(ManualClock::new())).unwrap()
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        assert_eq!(
            ClientLimiterRegistry::new(0.0, 10).unwrap_err(),
            RateLimitError::InvalidRate(0.0)
        );
        assert!(matches!(
            ClientLimiterRegistry::new(f64::NAN, 10),
            Err(RateLimitError::InvalidRate(_))
        ));
        assert!(matches!(
            ClientLimiterRegistry::new(-1.0, 10),
            Err(RateLimitError::InvalidRate(_))
        ));
        assert_eq!(
            ClientLimiterRegistry::new(10.0, 0).unwrap_err(),
            RateLimitError::ZeroBurst
        );
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = registry(10.0, 5);

        let first = registry.get_or_create("10.0.0.1");
        let second = registry.get_or_create("10.0.0.1");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clients_are_independent() {
        let registry = registry(1.0, 1);

        assert!(registry.get_or_create("a").allow());
        assert!(!registry.get_or_create("a").allow());
        // A different client still has its full burst.
        assert!(registry.get_or_create("b").allow());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_bucket() {
        let registry = Arc::new(registry(10.0, 5));
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create("203.0.113.7")
                })
            })
            .collect();

        let buckets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = buckets.first().unwrap();
        assert!(buckets.iter().all(|b| Arc::ptr_eq(first, b)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sweep_clears_entries_and_resets_buckets() {
        let registry = registry(1.0, 1);

        assert!(registry.get_or_create("a").allow());
        assert!(!registry.get_or_create("a").allow());
        registry.get_or_create("b");

        assert_eq!(registry.sweep(), 2);
        assert!(registry.is_empty());

        // Fresh bucket after the sweep: full burst again.
        assert!(registry.get_or_create("a").allow());
    }

    #[test]
    fn test_sweep_keeps_held_buckets_alive() {
        let registry = registry(1.0, 2);

        let held = registry.get_or_create("a");
        assert!(held.allow());
        registry.sweep();

        // The caller's handle still works; the registry just forgot it.
        assert!(held.allow());
        assert!(!Arc::ptr_eq(&held, &registry.get_or_create("a")));
    }

    #[tokio::test]
    async fn test_sweeper_evicts_periodically_and_stops_on_cancel() {
        let registry = Arc::new(registry(10.0, 5));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        registry.spawn_sweeper(Duration::from_millis(20), &tracker, cancel.clone());
        registry.get_or_create("a");
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.is_empty());

        cancel.cancel();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("sweeper should stop after cancellation");
    }
}
