//! Continuous (real-valued) token bucket.
//!
//! # Algorithm
//!
//! On every [`TokenBucket::allow`] call the bucket is first refilled by
//! `elapsed × rate` tokens, capped at `capacity`. If at least one whole token
//! is available it is consumed and the request is admitted.
//!
//! This admits bursts of up to `capacity` requests and then throttles to the
//! steady-state `rate`. It is not a fixed-window counter: tokens accrue
//! fractionally between calls.
//!
//! # Concurrency
//!
//! `tokens` and `last_refill` are only ever read or written together under the
//! bucket's own lock, so concurrent callers racing on the same client see a
//! single consistent bucket.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::Clock;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Rate limiter for a single client identity.
pub struct TokenBucket {
    capacity: u32,
    rate: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket holding `capacity` tokens, refilled at `rate`
    /// tokens per second.
    pub fn new(rate: f64, capacity: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            capacity,
            rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: now,
            }),
            clock,
        }
    }

    /// Try to take one token. Returns `true` if the request is admitted.
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until one whole token is available. Zero if one is available now.
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 || self.rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// Maximum number of tokens the bucket can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[inline]
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refilled = state.tokens + elapsed.as_secs_f64() * self.rate;
        state.tokens = refilled.min(f64::from(self.capacity));
        // Keep the later of the two so a clock read taken before another
        // caller's refill cannot move `last_refill` backwards.
        if now > state.last_refill {
            state.last_refill = now;
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .field("tokens", &state.tokens)
            .finish()
    }
}
