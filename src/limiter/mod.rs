//! Per-client admission control.
//!
//! - [`TokenBucket`]: one continuous token bucket for a single client
//! - [`ClientLimiterRegistry`]: concurrent map from client identity to bucket,
//!   with periodic wholesale eviction
//!
//! The HTTP-facing stage lives in [`crate::middleware::rate_limit`].

pub mod bucket;
pub mod registry;

pub use bucket::TokenBucket;
pub use registry::{ClientLimiterRegistry, DEFAULT_SWEEP_INTERVAL, RateLimitError};
