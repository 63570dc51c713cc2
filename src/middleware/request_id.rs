//! Correlation ID middleware.
//!
//! # Behaviour
//!
//! 1. Reuses the incoming `X-Request-ID` if it is non-empty visible ASCII of
//!    at most [`MAX_REQUEST_ID_LEN`] bytes; otherwise generates a UUIDv4
//! 2. Writes the ID back into the request headers and stores it as a
//!    [`RequestId`] extension for handlers
//! 3. Runs the rest of the pipeline inside a `request` span carrying the ID,
//!    so every log line of the request is correlated
//! 4. Sets the same `X-Request-ID` on the response
//!
//! # Client Usage
//!
//! ```bash
//! curl -H "X-Request-ID: my-correlation-id" http://localhost:8080/api/v1/add?a=1&b=2
//! ```

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Instrument, info_span};
use uuid::Uuid;

/// Header name for the correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied ID that is accepted as-is.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation ID of the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Fresh random (UUIDv4) ID.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request ID layer for Tower middleware stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Request ID service wrapper.
#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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
        let request_id = extract_or_generate_request_id(&req);
        // Only visible ASCII reaches here, which is always a valid header value
        let header_value = HeaderValue::from_str(request_id.as_str()).ok();

        if let Some(value) = &header_value {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }
        req.extensions_mut().insert(request_id.clone());

        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let mut response = inner.call(req).await?;

                if let Some(value) = header_value {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }

                Ok(response)
            }
            .instrument(span),
        )
    }
}

/// Whether a client-supplied ID can be reused verbatim.
pub fn is_valid_request_id(value: &[u8]) -> bool {
    !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value.iter().all(|b| b.is_ascii_graphic())
}

/// Extract request ID from headers or generate a new one.
fn extract_or_generate_request_id<B>(req: &Request<B>) -> RequestId {
    if let Some(value) = req.headers().get(REQUEST_ID_HEADER)
        && is_valid_request_id(value.as_bytes())
        && let Ok(value) = value.to_str()
    {
        return RequestId::new(value);
    }

    RequestId::generate()
}

/// Extension trait to read the correlation ID from a request.
pub trait RequestIdExt {
    /// The [`RequestId`] extension, falling back to the raw header.
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.extensions()
            .get::<RequestId>()
            .map(RequestId::as_str)
            .or_else(|| {
                self.headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::{ServiceBuilder, ServiceExt, service_fn};

    #[test]
    fn test_extract_existing_request_id() {
        let req = Request::builder()
            .header("x-request-id", "existing-id-123")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_or_generate_request_id(&req).as_str(), "existing-id-123");
    }

    #[test]
    fn test_generate_new_request_id() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let id = extract_or_generate_request_id(&req);

        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_invalid_request_ids_are_replaced() {
        assert!(!is_valid_request_id(b""));
        assert!(!is_valid_request_id(b"has space"));
        assert!(!is_valid_request_id("caf\u{e9}".as_bytes()));
        assert!(!is_valid_request_id(&[b'a'; MAX_REQUEST_ID_LEN + 1]));
        assert!(is_valid_request_id(&[b'a'; MAX_REQUEST_ID_LEN]));

        let req = Request::builder()
            .header("x-request-id", "has space")
            .body(Body::empty())
            .unwrap();
        let id = extract_or_generate_request_id(&req);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_request_id_ext_prefers_extension() {
        let mut req = Request::builder()
            .header("x-request-id", "from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(req.request_id(), Some("from-header"));

        req.extensions_mut().insert(RequestId::new("from-extension"));
        assert_eq!(req.request_id(), Some("from-extension"));
    }

    #[test]
    fn test_request_id_ext_none() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(req.request_id(), None);
    }

    #[tokio::test]
    async fn test_id_visible_to_handler_and_echoed() {
        let service = ServiceBuilder::new()
            .layer(RequestIdLayer::new())
            .service(service_fn(|req: Request<Body>| async move {
                let seen = req.request_id().unwrap_or_default().to_string();
                Ok::<_, Infallible>(Response::new(Body::from(seen)))
            }));

        let response = service
            .oneshot(
                Request::builder()
                    .header("x-request-id", "existing-id-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "existing-id-123");
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"existing-id-123");
    }

    #[tokio::test]
    async fn test_generated_id_matches_handler_view() {
        let service = RequestIdLayer::new().layer(service_fn(|req: Request<Body>| async move {
            let id = req.extensions().get::<RequestId>().cloned().unwrap();
            Ok::<_, Infallible>(Response::new(Body::from(id.to_string())))
        }));

        let response = service
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers()["x-request-id"].to_str().unwrap().to_string();
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(header.as_bytes(), &body[..]);
        assert!(Uuid::parse_str(&header).is_ok());
    }
}
