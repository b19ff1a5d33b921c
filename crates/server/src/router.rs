//! HTTP routing for the gateway and metrics listeners.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use gateway_core::{
    metrics::MetricsCollector,
    proxy::{DispatchOutcome, Dispatcher, UpstreamReply},
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::error;

/// Request bodies above this size are rejected before dispatch.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Connection-scoped headers that must not be copied from the upstream
/// response onto the client response. `content-length` is recomputed from
/// the buffered body.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Routes every JSON-RPC POST (any path, so provider-style `/<apikey>` paths
/// keep working) into the dispatcher.
pub fn gateway_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/*path", post(handle_rpc))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .with_state(dispatcher)
}

/// Routes for the metrics listener: liveness and Prometheus exposition.
pub fn metrics_router(metrics: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/metrics", get(handle_metrics))
        .with_state(metrics)
}

async fn handle_rpc(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
    body: Body,
) -> Response<Body> {
    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return service_unavailable();
        }
    };

    let client_gzip = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("gzip"));

    match dispatcher.dispatch(body, client_gzip).await {
        DispatchOutcome::Success(reply) => into_client_response(reply),
        DispatchOutcome::Exhausted => service_unavailable(),
    }
}

async fn handle_healthz() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "{\"healthy\":true}")
}

async fn handle_metrics(State(metrics): State<Arc<MetricsCollector>>) -> String {
    metrics.render()
}

/// Copies status, headers, and body from the upstream reply verbatim, minus
/// hop-by-hop headers.
fn into_client_response(reply: UpstreamReply) -> Response<Body> {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in &reply.headers {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            response_headers.append(name.clone(), value.clone());
        }
    }

    builder.body(Body::from(reply.body)).unwrap_or_else(|e| {
        error!(error = %e, "failed to assemble client response");
        service_unavailable()
    })
}

fn service_unavailable() -> Response<Body> {
    let mut response = Response::new(Body::from("Service Unavailable"));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
}
