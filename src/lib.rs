//! # Playground Server
//!
//! An integer calculator served through a composable middleware pipeline,
//! featuring:
//!
//! - **Composition**: Stages are plain `Handler → Handler` transformations in an explicit order
//! - **Admission control**: Per-client token buckets with periodic eviction
//! - **Resilience**: Handler panics contained as `500` responses
//! - **Observability**: Request IDs, structured access logs, Prometheus metrics
//! - **Write-behind**: Results recorded off the request path, drained on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline (CORS → Request ID → Observability → Recovery     │
//! │            → Rate Limit → Compression)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Router / Handlers (calc, history, health)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CalculatorService → WriteBehindRecorder                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RecordSink (MemorySink)                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use playground_server::{AppState, Config, MonotonicClock, build_pipeline, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config.clone());
//!     let pipeline = build_pipeline(&config, build_router(state.clone()), Arc::new(MonotonicClock))?;
//!     if let Some(registry) = &pipeline.registry {
//!         state.spawn_sweeper(registry);
//!     }
//!
//!     // Serve pipeline.into_router(), then:
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Rate Limiting
//!
//! ```bash
//! RATE_LIMIT_RPS=100 RATE_LIMIT_BURST=20 cargo run
//! RATE_LIMIT_ENABLED=false cargo run
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
pub mod sink;
pub mod state;
pub mod telemetry;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::Config;
pub use error::{ApiError, AppError, AppResult};
pub use limiter::{ClientLimiterRegistry, RateLimitError, TokenBucket};
pub use pipeline::{Handler, Pipeline, Stage, build_pipeline, compose};
pub use routes::build_router;
pub use services::{RecordError, WriteBehindRecorder};
pub use sink::{MemorySink, RecordSink, SinkError};
pub use state::AppState;
