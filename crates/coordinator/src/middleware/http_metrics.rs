//! HTTP metrics middleware.
//!
//! Records every response, including framework-level rejections that never
//! reach a handler (415 on a wrong Content-Type, 400 on a JSON parse error,
//! 404, 405).

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records method, normalized path, status and duration.
///
/// Applied as the outermost layer.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::post,
        Json, Router,
    };
    use tower::ServiceExt;

    async fn echo(Json(value): Json<serde_json::Value>) -> Json<serde_json::Value> {
        Json(value)
    }

    fn test_app() -> Router {
        Router::new()
            .route("/join", post(echo))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    #[tokio::test]
    async fn test_middleware_passes_success_through() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/join")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":"alice"}"#))
            .expect("request builder should succeed");

        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_sees_extractor_rejection() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/join")
            .header("content-type", "text/plain")
            .body(Body::from("alice"))
            .expect("request builder should succeed");

        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_middleware_sees_not_found() {
        let request = HttpRequest::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .expect("request builder should succeed");

        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
