//! HTTP server for the resource API, live events and Prometheus metrics.

use crate::notifier::WebNotifier;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures::stream::{Stream, StreamExt};
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use watcher::{Resource, ResourceView, WatcherMetrics};

/// A resource as listed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceEntry {
    #[serde(flatten)]
    pub resource: Resource,
    pub good: bool,
}

impl From<Resource> for ResourceEntry {
    fn from(resource: Resource) -> Self {
        let good = resource.good();
        Self { resource, good }
    }
}

/// Shared state of the handlers
#[derive(Clone)]
pub struct AppState {
    pub view: ResourceView,
    pub events: WebNotifier,
    pub metrics: Option<Arc<WatcherMetrics>>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/list", get(list_handler))
        .route("/api/events", get(events_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the API on a bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(listen_addr = %addr, "Web server listening");
    }
    axum::serve(listener, router(state)).await
}

async fn list_handler(State(state): State<AppState>) -> Json<Vec<ResourceEntry>> {
    let entries = state
        .view
        .snapshot()
        .into_iter()
        .map(ResourceEntry::from)
        .collect();
    Json(entries)
}

/// Server-sent events, one `update` per changed resource.
async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let events = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(resource) => Event::default()
                .event("update")
                .json_data(ResourceEntry::from(resource))
                .ok()
                .map(Ok),
            Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                .event("lagged")
                .json_data(serde_json::json!({ "missed": n }))
                .ok()
                .map(Ok),
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(metrics) = state.metrics else {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    };

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &metrics.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

async fn health_handler() -> &'static str {
    "ok"
}
