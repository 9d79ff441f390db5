//! HTTP routes for the coordinator.
//!
//! Defines the Axum router and application state.

use crate::actors::CoordinatorHandle;
use crate::bus::ChannelBus;
use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::observability::HealthState;
use crate::services::CreditLedger;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Mailbox of the actor owning queue and session state.
    pub coordinator: CoordinatorHandle,

    /// Realtime fan-out.
    pub bus: ChannelBus,

    /// Credit balances.
    pub ledger: Arc<dyn CreditLedger>,

    /// Liveness/readiness flags.
    pub health: Arc<HealthState>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready` - Liveness and readiness probes
/// - `/metrics` - Prometheus metrics endpoint
/// - `/join`, `/leave` - Queue membership
/// - `/send-event` - Game event ingress
/// - `/realtime` - Server-sent event stream of both channels
/// - `/ledger/credits` - Payment webhook
/// - Permissive CORS (browser clients are served from other origins)
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second timeout on producing a response (SSE bodies stream past it)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/join", post(handlers::join))
        .route("/leave", post(handlers::leave))
        .route("/send-event", post(handlers::send_event))
        .route("/realtime", get(handlers::subscribe))
        .route("/ledger/credits", post(handlers::grant_credits))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. CorsLayer - Answer preflights, tag responses (innermost)
    // 2. TimeoutLayer - Timeout the request
    // 3. TraceLayer - Log request details
    // 4. http_metrics_middleware - Record ALL responses (outermost)
    api_routes
        .merge(metrics_routes)
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{CoordinatorActor, CoordinatorSettings};
    use crate::scene::{Scene, SceneSettings};
    use crate::services::{InMemoryLedger, MockLedger};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn test_app(ledger: Arc<dyn CreditLedger>, vars: &[(&str, &str)]) -> Router {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let config = Config::from_vars(&vars).unwrap();
        let bus = ChannelBus::new(config.bus_capacity);
        let (coordinator, _task) = CoordinatorActor::spawn(
            CoordinatorSettings::from_config(&config),
            ledger.clone(),
            bus.clone(),
            Scene::with_seed(SceneSettings::default(), 9),
            CancellationToken::new(),
        );
        let health = Arc::new(HealthState::new());
        health.set_ready();

        let state = Arc::new(AppState {
            config,
            coordinator,
            bus,
            ledger,
            health,
        });
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(state, handle)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_join_returns_standing() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(post_json("/join", r#"{"id":"alice"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["active"], true);
        assert_eq!(body["remaining"], 30);
        assert_eq!(body["seq"], 1);
        assert!(body["epoch"].is_string());
    }

    #[tokio::test]
    async fn test_join_without_credits_is_402() {
        let app = test_app(Arc::new(MockLedger::with_credits(0)), &[]);

        let response = app
            .oneshot(post_json("/join", r#"{"id":"alice"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body_json(response).await["error"]["code"], "NO_CREDITS");
    }

    #[tokio::test]
    async fn test_leave_accepts_plain_text_beacon() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let request = Request::builder()
            .method("POST")
            .uri("/leave")
            .header("content-type", "text/plain;charset=UTF-8")
            .body(Body::from(r#"{"id":"alice"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_leave_with_garbage_is_still_ok() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(post_json("/leave", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_event_is_accepted_even_when_discarded() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(post_json(
                "/send-event",
                r#"{"channel":"joystick-channel","event":"move","data":{"direction":"up"},"sender":"mallory"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_send_event_rejects_queue_channel() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(post_json(
                "/send-event",
                r#"{"channel":"joystick-queue","event":"queue-update","data":{}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_event_rejects_unknown_event() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(post_json(
                "/send-event",
                r#"{"channel":"joystick-channel","event":"teleport","data":{}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_event_rejects_reserved_event() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(post_json(
                "/send-event",
                r#"{"channel":"joystick-channel","event":"bg-impact","data":{"impact":40,"name":"Donut","type":"consumable"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_realtime_rejects_unknown_channel() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(
                Request::get("/realtime?channels=lobby")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_realtime_is_event_stream() {
        let app = test_app(Arc::new(MockLedger::with_credits(1)), &[]);

        let response = app
            .oneshot(
                Request::get("/realtime?channels=joystick-queue")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        // The first frame is the current snapshot.
        let frame = response.into_body().frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("event: queue-update\n"));
        assert!(text.contains(r#""channel":"joystick-queue""#));
    }

    #[tokio::test]
    async fn test_ledger_webhook_disabled_without_secret() {
        let app = test_app(Arc::new(InMemoryLedger::new(0)), &[]);

        let response = app
            .oneshot(post_json("/ledger/credits", r#"{"id":"alice","credits":2}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ledger_webhook_grants_credits() {
        let app = test_app(
            Arc::new(InMemoryLedger::new(0)),
            &[("LEDGER_WEBHOOK_SECRET", "s3cret")],
        );

        let mut wrong = post_json("/ledger/credits", r#"{"id":"alice","credits":2}"#);
        wrong
            .headers_mut()
            .insert("x-ledger-secret", "guess".parse().unwrap());
        let response = app.clone().oneshot(wrong).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let mut right = post_json("/ledger/credits", r#"{"id":"alice","credits":2}"#);
        right
            .headers_mut()
            .insert("x-ledger-secret", "s3cret".parse().unwrap());
        let response = app.clone().oneshot(right).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["credits"], 2);

        // The granted credit buys a session.
        let response = app
            .oneshot(post_json("/join", r#"{"id":"alice"}"#))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["totalSeconds"], 60);
    }
}
