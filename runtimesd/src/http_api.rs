//! HTTP API for event ingest and observability.
//!
//! Provides:
//! - `POST /events` - Submit one build payload (bearer token when configured)
//! - `/health` - Daemon health and queue state
//! - `/metrics` - Prometheus metrics export

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use runtimes_common::BuildPayload;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::DaemonContext;
use crate::ingest::IngestOutcome;

/// Create the HTTP router.
pub fn create_router(ctx: DaemonContext) -> Router {
    Router::new()
        .route("/events", post(events_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(ctx))
}

/// Whether `headers` carry the configured bearer token.
fn authorized(ctx: &DaemonContext, headers: &HeaderMap) -> bool {
    let Some(expected) = &ctx.token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|presented| expected.matches(presented.trim()))
}

/// Handler for `POST /events`.
///
/// Returns 202 whether the payload was queued or skipped, 400 for a body
/// that is not a valid payload and 503 once shutdown has begun. When a token
/// is configured, requests without it get 401 before the body is read.
async fn events_handler(
    State(ctx): State<Arc<DaemonContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !authorized(&ctx, &headers) {
        warn!("Rejected event without a valid bearer token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "unauthorized" })),
        );
    }

    let payload: BuildPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            debug!("Rejected malformed payload: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "invalid", "error": e.to_string() })),
            );
        }
    };

    match ctx.ingest.submit(payload) {
        IngestOutcome::Queued => (StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))),
        IngestOutcome::Evicted(evicted) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "evicted": evicted })),
        ),
        IngestOutcome::Skipped(reason) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "skipped", "reason": reason.as_str() })),
        ),
        IngestOutcome::Closed => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "closed" })),
        ),
    }
}

/// Handler for `/metrics` - Prometheus metrics export.
async fn metrics_handler(State(ctx): State<Arc<DaemonContext>>) -> impl IntoResponse {
    match ctx.metrics.encode() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Handler for `/health`.
async fn health_handler(State(ctx): State<Arc<DaemonContext>>) -> impl IntoResponse {
    let queue = ctx.ingest.queue();
    let status = if queue.is_closed() { "draining" } else { "healthy" };
    Json(json!({
        "status": status,
        "version": ctx.version,
        "pid": ctx.pid,
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
        "queue": {
            "depth": queue.len(),
            "capacity": queue.capacity(),
            "evicted_total": queue.evicted_total(),
        },
    }))
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    ctx: DaemonContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = create_router(ctx);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingest;
    use crate::metrics::Metrics;
    use crate::queue::BuildQueue;
    use axum::body::Body;
    use axum::http::Request;
    use runtimes_common::{IngestToken, SuiteRegistry};
    use std::time::Instant;
    use tower::ServiceExt;

    fn make_test_context() -> DaemonContext {
        let metrics = Metrics::new().unwrap();
        let queue = Arc::new(BuildQueue::new(2));
        DaemonContext {
            ingest: Ingest::new(Arc::new(SuiteRegistry::builtin()), queue, metrics.clone()),
            metrics,
            started_at: Instant::now(),
            version: "0.1.0-test",
            pid: 12345,
            token: None,
        }
    }

    async fn send_event(
        router: Router,
        body: &str,
        authorization: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/events")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        let response = router
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_event(router: Router, body: &str) -> (StatusCode, serde_json::Value) {
        send_event(router, body, None).await
    }

    const PAYLOAD: &str = r#"{"platform":"linux64","buildtype":"opt","buildid":"1",
        "revision":"r","builddate":0,"test":"mochitest-gl",
        "blobber_files":{"a_raw.log":"http://example.test/a_raw.log"}}"#;

    #[tokio::test]
    async fn test_post_event_queues() {
        let ctx = make_test_context();
        let (status, json) = post_event(create_router(ctx.clone()), PAYLOAD).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "queued");
        assert_eq!(ctx.ingest.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_post_event_unknown_platform_skipped() {
        let ctx = make_test_context();
        let body = PAYLOAD.replace("linux64", "plan9");
        let (status, json) = post_event(create_router(ctx.clone()), &body).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "unknown_platform");
        assert!(ctx.ingest.queue().is_empty());
    }

    #[tokio::test]
    async fn test_post_event_malformed_is_bad_request() {
        let ctx = make_test_context();
        let (status, json) = post_event(create_router(ctx.clone()), "{\"platform\":").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "invalid");

        let (status, _) = post_event(create_router(ctx), r#"{"platform":"linux64"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_event_after_close_unavailable() {
        let ctx = make_test_context();
        ctx.ingest.queue().close();
        let (status, json) = post_event(create_router(ctx), PAYLOAD).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "closed");
    }

    #[tokio::test]
    async fn test_post_event_with_token_accepted() {
        let mut ctx = make_test_context();
        ctx.token = Some(IngestToken::new("ingest-secret"));
        let (status, json) = send_event(
            create_router(ctx.clone()),
            PAYLOAD,
            Some("Bearer ingest-secret"),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "queued");
        assert_eq!(ctx.ingest.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_post_event_without_token_unauthorized() {
        let mut ctx = make_test_context();
        ctx.token = Some(IngestToken::new("ingest-secret"));

        for authorization in [
            None,
            Some("Bearer wrong-secret"),
            Some("Basic aW5nZXN0LXNlY3JldA=="),
            Some("ingest-secret"),
        ] {
            let (status, json) =
                send_event(create_router(ctx.clone()), PAYLOAD, authorization).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{authorization:?}");
            assert_eq!(json["status"], "unauthorized");
        }
        assert!(ctx.ingest.queue().is_empty());
    }

    #[tokio::test]
    async fn test_token_not_required_for_health() {
        let mut ctx = make_test_context();
        ctx.token = Some(IngestToken::new("ingest-secret"));
        let response = create_router(ctx)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let ctx = make_test_context();
        let response = create_router(ctx)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.1.0-test");
        assert_eq!(json["pid"], 12345);
        assert_eq!(json["queue"]["capacity"], 2);
        assert_eq!(json["queue"]["depth"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let ctx = make_test_context();
        post_event(create_router(ctx.clone()), PAYLOAD).await;

        let response = create_router(ctx)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("runtimes_events_received_total 1"));
        assert!(text.contains("runtimes_queue_depth 1"));
    }
}
