//! Application routing.
//!
//! The router is the terminal handler of the middleware pipeline (see
//! [`crate::pipeline`]); cross-cutting stages are not applied here.
//!
//! # Route Groups
//!
//! - `/api/v1/{add,subtract,multiply,divide}` - Calculator
//! - `/api/v1/history` - Recorded calculations, newest first
//! - `/{add,subtract,multiply,divide,history}` - Legacy aliases of the above
//! - `/`, `/healthz` - Greeting and liveness
//! - a known path with another method - `405` JSON envelope
//! - anything else - `404` JSON envelope
//!
//! Every route reports its template to the observability stage through
//! [`record_matched_route`], which is what metrics are labelled with.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::handlers;
use crate::middleware::record_matched_route;
use crate::state::AppState;

/// Build the application router with its state attached.
pub fn build_router(state: AppState) -> Router {
    let max_body = state.config.max_request_body_size;

    let api = calculator_routes();

    let router = Router::new()
        .nest("/api/v1", api.clone())
        .merge(api)
        .route("/", get(handlers::home))
        .route("/healthz", get(handlers::healthz))
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .route_layer(from_fn(record_matched_route))
        .fallback(handlers::not_found);

    // Request body size limit (prevents DoS via large payloads)
    info!(
        max_size_kb = max_body / 1024,
        "Request body size limit configured"
    );

    router
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

fn calculator_routes() -> Router<AppState> {
    Router::new()
        .route("/add", get(handlers::add))
        .route("/subtract", get(handlers::subtract))
        .route("/multiply", get(handlers::multiply))
        .route("/divide", get(handlers::divide))
        .route("/history", get(handlers::history))
}

/// Build CORS layer from configuration.
///
/// # Arguments
///
/// * `allowed_origins` - List of allowed origins, or `["*"]` for any origin
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    // Check if we should allow any origin
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        // Parse specific origins
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::middleware::MatchedRoute;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(AppState::new(Config::default()))
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_versioned_and_legacy_routes() {
        let (status, json) = get_json("/api/v1/add?a=2&b=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["result"], 5);

        let (status, json) = get_json("/multiply?a=-4&b=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["result"], -12);
    }

    #[tokio::test]
    async fn test_calculator_errors() {
        let (status, json) = get_json("/divide?a=1&b=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Division by zero");

        let (_, json) = get_json("/add?a=1").await;
        assert_eq!(json["message"], "Parameter is required");

        let (_, json) = get_json("/subtract?a=x&b=1").await;
        assert_eq!(json["message"], "Invalid parameter format");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_envelope() {
        let (status, json) = get_json("/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], 404);
        assert_eq!(json["message"], "Not Found");
    }

    #[tokio::test]
    async fn test_history_is_versioned_too() {
        for uri in ["/api/v1/history", "/history?limit=5"] {
            let (status, json) = get_json(uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(json["data"], serde_json::json!([]));
        }
    }

    #[tokio::test]
    async fn test_repeated_operand_uses_first_value() {
        let (status, json) = get_json("/api/v1/add?a=1&a=2&b=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["result"], 4);

        let (status, json) = get_json("/subtract?a=x&a=1&b=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Invalid parameter format");
    }

    #[tokio::test]
    async fn test_wrong_method_is_405_envelope() {
        for uri in ["/add?a=1&b=2", "/api/v1/divide?a=4&b=2", "/api/v1/history"] {
            let response = router()
                .oneshot(
                    Request::builder()
                        .method(Method::POST)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{uri}");
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["code"], 405);
            assert_eq!(json["message"], "Method not allowed");
        }
    }

    #[tokio::test]
    async fn test_router_reports_route_template() {
        for (uri, expected) in [
            ("/api/v1/add?a=1&b=2", "/api/v1/add"),
            ("/add?a=1&b=2", "/add"),
            ("/api/v1/history", "/api/v1/history"),
            ("/healthz", "/healthz"),
            ("/scan-1234", "<unmatched>"),
        ] {
            let route = MatchedRoute::new();
            let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            req.extensions_mut().insert(route.clone());

            router().oneshot(req).await.unwrap();
            assert_eq!(route.label(), expected, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_plain_text_endpoints() {
        for (uri, expected) in [("/", "Welcome to Playground!"), ("/healthz", "OK")] {
            let response = router()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&bytes[..], expected.as_bytes());
        }
    }

    #[test]
    fn test_build_cors_layer_any() {
        let origins = vec!["*".to_string()];
        let _layer = build_cors_layer(&origins);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_build_cors_layer_specific() {
        let origins = vec![
            "https://example.com".to_string(),
            "https://app.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
        // Just verify it doesn't panic
    }
}
