//! Per-client rate limiting middleware.
//!
//! # Algorithm
//!
//! Each client identity (see [`super::ip`]) gets its own continuous token
//! bucket from the shared [`ClientLimiterRegistry`]: `burst` tokens of
//! capacity refilled at `rps` tokens per second. A request is admitted when
//! its client's bucket holds at least one token.
//!
//! # Configuration
//!
//! - `RATE_LIMIT_ENABLED`: when false the layer is a pass-through and no
//!   registry exists
//! - `RATE_LIMIT_RPS`: Sustained requests per second per client
//! - `RATE_LIMIT_BURST`: Bucket capacity per client
//! - `TRUSTED_PROXIES`: CIDR ranges of trusted reverse proxies
//!
//! # Response
//!
//! On rejection the inner service is not called and the client receives
//! `429 Too Many Requests` with the standard JSON envelope and:
//! - `Retry-After`: Seconds until one token is available (at least 1)
//! - `X-RateLimit-Limit`: Configured RPS limit
//! - `X-RateLimit-Remaining`: Always `0`

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, resolved_client_ip};
use super::request_id::RequestIdExt;
use crate::limiter::ClientLimiterRegistry;
use crate::metrics;
use crate::models::Envelope;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let registry = Arc::new(ClientLimiterRegistry::new(100.0, 20)?);
/// let layer = RateLimitLayer::new(registry, TrustedProxyConfig::default());
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    registry: Option<Arc<ClientLimiterRegistry>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    /// Enforce limits from `registry`.
    pub fn new(registry: Arc<ClientLimiterRegistry>, trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            registry: Some(registry),
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    /// A layer that admits every request.
    pub fn disabled() -> Self {
        Self {
            registry: None,
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.registry.is_some()
    }

    pub fn registry(&self) -> Option<&Arc<ClientLimiterRegistry>> {
        self.registry.as_ref()
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            registry: self.registry.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    registry: Option<Arc<ClientLimiterRegistry>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let Some(registry) = &self.registry else {
            return Box::pin(async move { inner.call(req).await });
        };

        let client_ip = resolved_client_ip(&req, &self.trusted_proxies);
        let bucket = registry.get_or_create(client_ip.as_str());

        if bucket.allow() {
            return Box::pin(async move { inner.call(req).await });
        }

        let retry_after = bucket.retry_after().as_secs_f64().ceil().max(1.0) as u64;
        metrics::record_rate_limited();
        warn!(
            client_ip = %client_ip,
            path = %req.uri().path(),
            retry_after_secs = retry_after,
            "Rate limit exceeded"
        );

        let response = too_many_requests(req.request_id(), retry_after, registry.rate());
        Box::pin(async move { Ok(response) })
    }
}

/// Build the 429 rejection.
fn too_many_requests(request_id: Option<&str>, retry_after_secs: u64, limit: f64) -> Response<Body> {
    let mut response = Envelope::from_status(StatusCode::TOO_MANY_REQUESTS)
        .with_request_id(request_id)
        .into_response();

    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert(X_RATELIMIT_LIMIT, value);
    }
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("0"));

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::middleware::ip::ClientIp;
    use http_body_util::BodyExt;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::util::BoxCloneService;
    use tower::{ServiceExt, service_fn};

    fn limited(layer: &RateLimitLayer) -> (BoxCloneService<Request<Body>, Response<Body>, Infallible>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = service_fn(move |_req: Request<Body>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Body::from("ok"))) }
        });
        (BoxCloneService::new(layer.layer(inner)), calls)
    }

    fn request_from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/add")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn layer_with(rate: f64, burst: u32, clock: Arc<ManualClock>) -> RateLimitLayer {
        let registry = Arc::new(ClientLimiterRegistry::with_clock(rate, burst, clock).unwrap());
        RateLimitLayer::new(registry, TrustedProxyConfig::default())
    }

    #[tokio::test]
    async fn test_rejects_after_burst_without_calling_inner() {
        let clock = Arc::new(ManualClock::new());
        let layer = layer_with(1.0, 3, clock);
        let (service, calls) = limited(&layer);

        for _ in 0..3 {
            let response = service.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let mut req = request_from("10.0.0.1");
        req.extensions_mut()
            .insert(crate::middleware::request_id::RequestId::new("rl-1"));
        let response = service.clone().oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(response.headers()["retry-after"], "1");
        assert_eq!(response.headers()["x-ratelimit-limit"], "1");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 429);
        assert_eq!(json["message"], "Too Many Requests");
        assert_eq!(json["request_id"], "rl-1");
    }

    #[tokio::test]
    async fn test_clients_are_limited_independently() {
        let clock = Arc::new(ManualClock::new());
        let layer = layer_with(1.0, 1, clock);
        let (service, _) = limited(&layer);

        let first = service.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        let second = service.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        let other = service.clone().oneshot(request_from("10.0.0.2")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(other.status(), StatusCode::OK);
        assert_eq!(layer.registry().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_tokens_refill_over_time() {
        let clock = Arc::new(ManualClock::new());
        let layer = layer_with(2.0, 1, clock.clone());
        let (service, _) = limited(&layer);

        assert_eq!(
            service.clone().oneshot(request_from("a")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            service.clone().oneshot(request_from("a")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        clock.advance(Duration::from_millis(500));
        assert_eq!(
            service.clone().oneshot(request_from("a")).await.unwrap().status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_uses_client_ip_from_earlier_stage() {
        let clock = Arc::new(ManualClock::new());
        let layer = layer_with(1.0, 1, clock);
        let (service, _) = limited(&layer);

        let mut req = request_from("10.0.0.1");
        req.extensions_mut().insert(ClientIp::new("resolved"));
        service.clone().oneshot(req).await.unwrap();

        let registry = layer.registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get_or_create("resolved").available() < 1.0);
    }

    #[tokio::test]
    async fn test_disabled_layer_passes_everything() {
        let layer = RateLimitLayer::disabled();
        assert!(!layer.is_enabled());
        assert!(layer.registry().is_none());

        let (service, calls) = limited(&layer);
        for _ in 0..50 {
            let response = service.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 50);
    }
}
