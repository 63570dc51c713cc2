//! Middleware pipeline composition.
//!
//! A [`Handler`] is a boxed tower service from request to response that never
//! fails; errors are already responses by the time they reach it. A [`Stage`]
//! turns one handler into another. [`compose`] wraps a terminal handler in an
//! ordered list of stages, first stage outermost:
//!
//! ```text
//! compose(T, [S1, S2, S3])
//!
//! S1.before → S2.before → S3.before → T → S3.after → S2.after → S1.after
//! ```
//!
//! The stage list is fixed when the pipeline is built. Changing configuration
//! means building a new pipeline.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use tracing::info;

use crate::clock::Clock;
use crate::config::Config;
use crate::limiter::{ClientLimiterRegistry, RateLimitError};
use crate::middleware::{
    CompressionLayer, ObservabilityLayer, RateLimitLayer, RecoveryLayer, RequestIdLayer,
    TrustedProxyConfig,
};
use crate::routes::build_cors_layer;

/// Boxed request handler every stage consumes and produces.
pub type Handler = BoxCloneSyncService<Request<Body>, Response<Body>, Infallible>;

type WrapFn = dyn Fn(Handler) -> Handler + Send + Sync;

/// A named `Handler → Handler` transformation.
#[derive(Clone)]
pub struct Stage {
    name: &'static str,
    wrap: Arc<WrapFn>,
}

impl Stage {
    pub fn new<F>(name: &'static str, wrap: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self {
            name,
            wrap: Arc::new(wrap),
        }
    }

    /// Build a stage from any tower layer whose service can be boxed as a
    /// [`Handler`].
    pub fn from_layer<L>(name: &'static str, layer: L) -> Self
    where
        L: Layer<Handler> + Send + Sync + 'static,
        L::Service: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        Self::new(name, move |inner| Handler::new(layer.layer(inner)))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, inner: Handler) -> Handler {
        (self.wrap)(inner)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Wrap `terminal` in `stages`, the first stage outermost.
pub fn compose(terminal: Handler, stages: &[Stage]) -> Handler {
    stages
        .iter()
        .rev()
        .fold(terminal, |handler, stage| stage.apply(handler))
}

// =============================================================================
// Standard Pipeline
// =============================================================================

/// The application's stage list, outermost first.
///
/// ```text
/// cors → request_id → observability → recovery → rate_limit → compression
/// ```
///
/// Observability sits outside recovery so contained panics are logged and
/// counted as `500`. Rate limiting sits inside recovery and the access log so
/// rejections are logged with their request ID.
pub fn standard_stages(config: &Config, registry: Option<Arc<ClientLimiterRegistry>>) -> Vec<Stage> {
    let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);

    let rate_limit = match registry {
        Some(registry) => RateLimitLayer::new(registry, trusted_proxies.clone()),
        None => RateLimitLayer::disabled(),
    };

    vec![
        Stage::from_layer("cors", build_cors_layer(&config.cors_allowed_origins)),
        Stage::from_layer("request_id", RequestIdLayer::new()),
        Stage::from_layer("observability", ObservabilityLayer::new(trusted_proxies)),
        Stage::from_layer("recovery", RecoveryLayer::new()),
        Stage::from_layer("rate_limit", rate_limit),
        Stage::from_layer("compression", CompressionLayer::new(config.compression_level)),
    ]
}

/// A composed pipeline and the limiter registry it enforces, if any.
#[derive(Clone)]
pub struct Pipeline {
    pub handler: Handler,
    pub registry: Option<Arc<ClientLimiterRegistry>>,
}

impl Pipeline {
    /// Mount the pipeline as the catch-all service of a fresh router, ready
    /// for `axum::serve`.
    pub fn into_router(self) -> Router {
        Router::new().fallback_service(self.handler)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Build the standard pipeline around `router`.
///
/// When rate limiting is disabled no registry is constructed, so neither the
/// limiter nor its sweeper exists.
///
/// # Errors
///
/// Returns `RateLimitError` if the configured rate or burst is invalid.
pub fn build_pipeline(
    config: &Config,
    router: Router,
    clock: Arc<dyn Clock>,
) -> Result<Pipeline, RateLimitError> {
    let registry = if config.rate_limiting_enabled() {
        let registry = ClientLimiterRegistry::with_clock(
            config.rate_limit_rps,
            config.rate_limit_burst,
            clock,
        )?;
        info!(
            rps = config.rate_limit_rps,
            burst = config.rate_limit_burst,
            proxy_validation = config.proxy_validation_enabled(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        Some(Arc::new(registry))
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_ENABLED=false)");
        None
    };

    let stages = standard_stages(config, registry.clone());
    let handler = compose(Handler::new(router), &stages);

    Ok(Pipeline { handler, registry })
}
