//! Panic containment middleware.
//!
//! A panic inside any stage or handler wrapped by [`RecoveryLayer`] becomes a
//! generic `500` envelope for that one request. Both panics raised while
//! building the inner future (`Service::call`) and panics raised while
//! polling it are caught. The panic message is logged with the request ID;
//! it never reaches the client.
//!
//! Stages outside this layer are not protected, so it sits just inside the
//! access log in the standard pipeline.
//!
//! Requires `panic = "unwind"` (the default and what `Cargo.toml` sets).

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures::FutureExt;
use tower::{Layer, Service};
use tracing::error;

use super::request_id::RequestIdExt;
use crate::metrics;
use crate::models::Envelope;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryLayer;

impl RecoveryLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RecoveryService<S>
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
        let request_id = req.request_id().map(str::to_string);
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let mut inner = self.inner.clone();

        let future = match catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
            Ok(future) => future,
            Err(payload) => {
                let response = recovered(payload.as_ref(), request_id.as_deref(), &method, &path);
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(recovered(payload.as_ref(), request_id.as_deref(), &method, &path)),
            }
        })
    }
}

/// Best-effort panic message: `&str` and `String` payloads cover `panic!`.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn recovered(
    payload: &(dyn Any + Send),
    request_id: Option<&str>,
    method: &axum::http::Method,
    path: &str,
) -> Response<Body> {
    metrics::record_panic_recovered();
    error!(
        panic = panic_message(payload),
        request_id = request_id.unwrap_or("-"),
        method = %method,
        path = %path,
        "Recovered from handler panic"
    );

    Envelope::from_status(StatusCode::INTERNAL_SERVER_ERROR)
        .with_request_id(request_id)
        .into_response()
}
