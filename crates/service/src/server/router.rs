//! Axum router construction.

use axum::{
    middleware::from_fn_with_state,
    routing::{any, get},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
///
/// Health and status accept any method so the handlers can answer the wrong
/// ones with a counted 405.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", any(handlers::health))
        .route("/v1/system/status", any(handlers::system_status))
        .route("/v1/system/metrics", get(handlers::metrics))
        .route_layer(from_fn_with_state(state.clone(), middleware::track))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{logger::Logger, metrics::tests::sample, metrics::Metrics};
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use opentelemetry::trace::{Status, TracerProvider as _};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        state: AppState,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::init(dir.path(), "debug", None).unwrap();
        let metrics = Metrics::init(None).unwrap();
        let path = dir.path().display().to_string();
        let state = AppState::new(logger, metrics, None, &path, &path);
        Harness { _dir: dir, state }
    }

    async fn call(state: &AppState, method: Method, uri: &str) -> Response {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        build(state.clone()).oneshot(req).await.unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn rendered(state: &AppState) -> String {
        state.metrics.render().unwrap()
    }

    #[tokio::test]
    async fn get_health_counts_request() {
        let h = harness();
        let resp = call(&h.state, Method::GET, "/v1/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert!(body_text(resp).await.contains("OK"));

        let text = rendered(&h.state);
        let labels = [r#"method="GET""#, r#"endpoint="/v1/health""#, r#"status_code="200""#];
        assert_eq!(sample(&text, "service_http_requests_total", &labels), Some(1.0));
        assert_eq!(sample(&text, "health_endpoint_hits", &[]), Some(1.0));
        assert_eq!(sample(&text, "agent_errors", &[]), None);
    }

    #[tokio::test]
    async fn post_health_is_rejected_and_counted() {
        let h = harness();
        let resp = call(&h.state, Method::POST, "/v1/health").await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(body_text(resp).await.contains("Invalid request method"));

        let text = rendered(&h.state);
        assert_eq!(sample(&text, "agent_errors", &[]), Some(1.0));
        assert_eq!(
            sample(&text, "service_http_requests_total", &[r#"status_code="405""#]),
            Some(1.0)
        );
        assert_eq!(sample(&text, "health_endpoint_hits", &[]), None);
    }

    #[tokio::test]
    async fn system_status_reports_directories() {
        let h = harness();
        let resp = call(&h.state, Method::GET, "/v1/system/status").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["status"], "running");
        assert_eq!(body["data_dir"], &*h.state.data_dir);
        assert_eq!(body["log_dir"], &*h.state.log_dir);

        let resp = call(&h.state, Method::DELETE, "/v1/system/status").await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let h = harness();
        call(&h.state, Method::GET, "/v1/health").await;
        let resp = call(&h.state, Method::GET, "/v1/system/metrics").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let text = body_text(resp).await;
        assert!(text.contains("# TYPE service_http_requests_total counter"));
        assert!(text.contains("system_metrics_endpoint_hits"));
    }

    #[tokio::test]
    async fn unknown_route_returns_404_json() {
        let h = harness();
        let resp = call(&h.state, Method::GET, "/unknown").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn spans_carry_route_and_error_status() {
        let mut h = harness();
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        h.state.tracer = Some(provider.tracer("test"));

        call(&h.state, Method::GET, "/v1/health").await;
        call(&h.state, Method::POST, "/v1/health").await;

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);

        let ok = &spans[0];
        assert_eq!(ok.name, "HTTP GET /v1/health");
        assert!(ok
            .attributes
            .contains(&opentelemetry::KeyValue::new("http.route", "/v1/health")));
        assert!(ok
            .attributes
            .contains(&opentelemetry::KeyValue::new("http.status_code", 200_i64)));
        assert_eq!(ok.status, Status::Unset);

        let rejected = &spans[1];
        assert_eq!(rejected.name, "HTTP POST /v1/health");
        assert_eq!(rejected.status, Status::error("Method Not Allowed"));
    }

    #[tokio::test]
    async fn requests_are_counted_without_a_tracer() {
        let h = harness();
        assert!(h.state.tracer.is_none());
        call(&h.state, Method::GET, "/v1/health").await;
        let resp = call(&h.state, Method::POST, "/v1/health").await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let text = rendered(&h.state);
        for (method, status) in [("GET", "200"), ("POST", "405")] {
            let method_label = format!(r#"method="{method}""#);
            let status_label = format!(r#"status_code="{status}""#);
            let labels = [method_label.as_str(), r#"endpoint="/v1/health""#];
            assert_eq!(
                sample(&text, "service_http_request_duration_seconds_count", &labels),
                Some(1.0)
            );
            let labels = [labels[0], labels[1], status_label.as_str()];
            assert_eq!(sample(&text, "service_http_requests_total", &labels), Some(1.0));
        }
    }

    #[tokio::test]
    async fn upgrade_without_connection_support_is_rejected() {
        let h = harness();
        let req = Request::builder()
            .uri("/v1/health")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .body(Body::empty())
            .unwrap();
        let resp = build(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["code"], "not_supported");

        let text = rendered(&h.state);
        assert_eq!(sample(&text, "agent_errors", &[]), Some(1.0));
        assert_eq!(
            sample(&text, "service_http_requests_total", &[r#"status_code="400""#]),
            Some(1.0)
        );
        assert_eq!(sample(&text, "health_endpoint_hits", &[]), None);
    }
}
