//! Access logging and request metrics.
//!
//! Emits one structured `info!` record per request after the inner service
//! responds, and updates `http_requests_total` and
//! `http_request_duration_seconds` (see [`crate::metrics`]).
//!
//! This stage also resolves the client identity once and stores it as a
//! [`ClientIp`](super::ip::ClientIp) extension, so inner stages and handlers reuse it.
//!
//! The status is read from the response the inner service returns. Panics
//! are turned into responses by the recovery stage, which must sit inside
//! this one for them to be logged and counted as `500`.
//!
//! # Metric labels
//!
//! The access log carries the raw path, but metrics are labelled with the
//! route template the router matched (`/api/v1/add`), so the number of
//! series stays bounded whatever paths clients send. This stage plants an
//! empty [`MatchedRoute`] slot in the request extensions; the router fills it
//! through [`record_matched_route`], installed with `Router::route_layer`.
//! Requests no route matched (404s, wrong methods) are labelled
//! [`UNMATCHED_ROUTE`]. Non-standard HTTP methods share the method label
//! `OTHER`.

use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::header::USER_AGENT;
use axum::http::{Method, Request, Response};
use axum::middleware::Next;
use tower::{Layer, Service};
use tracing::info;

use super::ip::{TrustedProxyConfig, resolved_client_ip};
use super::request_id::RequestIdExt;
use crate::metrics;

/// Metric label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "<unmatched>";

/// Route template the router matched for a request, shared between this
/// stage and the router.
#[derive(Debug, Clone, Default)]
pub struct MatchedRoute(Arc<OnceLock<String>>);

impl MatchedRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// The matched template, or [`UNMATCHED_ROUTE`].
    pub fn label(&self) -> &str {
        self.0.get().map_or(UNMATCHED_ROUTE, String::as_str)
    }

    fn set(&self, route: &str) {
        // Only the innermost router match counts
        let _ = self.0.set(route.to_string());
    }
}

/// Route-layer middleware copying axum's [`MatchedPath`] into the request's
/// [`MatchedRoute`] slot before the handler runs, so the label survives a
/// handler panic.
pub async fn record_matched_route(req: Request<Body>, next: Next) -> Response<Body> {
    if let (Some(slot), Some(path)) = (
        req.extensions().get::<MatchedRoute>(),
        req.extensions().get::<MatchedPath>(),
    ) {
        slot.set(path.as_str());
    }
    next.run(req).await
}

fn method_label(method: &Method) -> &str {
    match *method {
        Method::GET
        | Method::HEAD
        | Method::POST
        | Method::PUT
        | Method::DELETE
        | Method::PATCH
        | Method::OPTIONS
        | Method::CONNECT
        | Method::TRACE => method.as_str(),
        _ => "OTHER",
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObservabilityLayer {
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl ObservabilityLayer {
    pub fn new(trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for ObservabilityLayer {
    type Service = ObservabilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ObservabilityService {
            inner,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityService<S> {
    inner: S,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for ObservabilityService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let start = Instant::now();

        let client_ip = resolved_client_ip(&req, &self.trusted_proxies);
        req.extensions_mut().insert(client_ip.clone());

        let route = MatchedRoute::new();
        req.extensions_mut().insert(route.clone());

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let request_id = req.request_id().map(str::to_string);
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;

            let elapsed = start.elapsed();
            let status = response.status().as_u16();
            metrics::record_request(
                method_label(&method),
                route.label(),
                status,
                elapsed.as_secs_f64(),
            );

            info!(
                method = %method,
                path = %path,
                status,
                duration_ms = elapsed.as_secs_f64() * 1000.0,
                client_ip = %client_ip,
                request_id = request_id.as_deref().unwrap_or("-"),
                user_agent = user_agent.as_deref().unwrap_or("-"),
                "HTTP request"
            );

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::ip::ClientIp;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    #[tokio::test]
    async fn test_passes_response_through_and_tags_client_ip() {
        let service = ObservabilityLayer::default().layer(service_fn(|req: Request<Body>| async move {
            let ip = req.extensions().get::<ClientIp>().cloned().unwrap();
            let mut response = Response::new(Body::from(ip.to_string()));
            *response.status_mut() = StatusCode::CREATED;
            Ok::<_, Infallible>(response)
        }));

        let response = service
            .oneshot(
                Request::builder()
                    .uri("/add?a=1&b=2")
                    .header("x-forwarded-for", "198.51.100.1")
                    .header("user-agent", "test-agent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"198.51.100.1");
    }

    #[tokio::test]
    async fn test_route_slot_defaults_to_unmatched() {
        let service = ObservabilityLayer::default().layer(service_fn(|req: Request<Body>| async move {
            let route = req.extensions().get::<MatchedRoute>().cloned().unwrap();
            Ok::<_, Infallible>(Response::new(Body::from(route.label().to_string())))
        }));

        let response = service
            .oneshot(Request::builder().uri("/scan-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], UNMATCHED_ROUTE.as_bytes());
    }

    #[test]
    fn test_matched_route_keeps_first_template() {
        let route = MatchedRoute::new();
        assert_eq!(route.label(), "<unmatched>");

        route.set("/api/v1/add");
        route.clone().set("/add");
        assert_eq!(route.label(), "/api/v1/add");
    }

    #[test]
    fn test_extension_methods_collapse() {
        assert_eq!(method_label(&Method::GET), "GET");
        assert_eq!(method_label(&Method::DELETE), "DELETE");
        let custom = Method::from_bytes(b"SCAN-4242").unwrap();
        assert_eq!(method_label(&custom), "OTHER");
    }

    #[tokio::test]
    async fn test_unknown_client_without_headers() {
        let service = ObservabilityLayer::default().layer(service_fn(|req: Request<Body>| async move {
            let ip = req.extensions().get::<ClientIp>().cloned().unwrap();
            Ok::<_, Infallible>(Response::new(Body::from(ip.to_string())))
        }));

        let response = service
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"unknown");
    }
}
