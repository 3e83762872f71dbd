use std::time::Instant;

use axum::body::HttpBody;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, warn};

use super::client_ip;
use crate::AppState;
use crate::metrics::Metrics;

/// One line per request: method, path, status, bytes, duration, peer.
pub async fn log(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let peer = client_ip(&req).unwrap_or_else(|| "-".to_string());

    let res = next.run(req).await;

    Metrics::incr(&state.metrics.http_requests);
    let status = res.status().as_u16();
    let bytes = res.body().size_hint().exact();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if res.status().is_server_error() {
        warn!(%method, %path, status, bytes, elapsed_ms, %peer, "request failed");
    } else {
        info!(%method, %path, status, bytes, elapsed_ms, %peer, "request served");
    }
    res
}
