//! HTTP pipeline stages.
//!
//! Every stage is a tower [`Layer`](tower::Layer) whose service boxes its
//! future, so any of them can wrap the boxed [`Handler`](crate::pipeline::Handler)
//! the pipeline composes:
//!
//! - **Correlation ID**: reuse or generate `X-Request-ID`, tag the request span
//! - **Observability**: one access-log record and request metrics per request
//! - **Recovery**: contain handler panics as generic `500` responses
//! - **Rate Limiting**: per-client token buckets, `429` on exhaustion
//! - **Compression**: gzip negotiated via `Accept-Encoding`
//! - **Client identity**: `X-Forwarded-For` / `X-Real-IP` / peer address,
//!   with trusted-proxy validation
//!
//! # Standard order
//!
//! ```text
//! Request → CORS → Request ID → Observability → Recovery → Rate Limit → Compression → Router
//!                      ↓              ↓              ↓            ↓             ↓
//!                X-Request-ID     access log      500 on      429 Too Many   gzip body
//!                                 + metrics        panic        Requests
//! ```

pub mod compression;
pub mod ip;
pub mod observability;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;

pub use compression::{CompressionLayer, CompressorPool, GzipStream, accepts_gzip};
pub use ip::{ClientIp, TrustedProxyConfig, UNKNOWN_IP, client_identity};
pub use observability::{MatchedRoute, ObservabilityLayer, UNMATCHED_ROUTE, record_matched_route};
pub use rate_limit::RateLimitLayer;
pub use recovery::RecoveryLayer;
pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdExt, RequestIdLayer};
