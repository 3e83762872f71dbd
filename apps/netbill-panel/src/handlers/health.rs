use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use tracing::warn;

use crate::AppState;
use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub database: bool,
    pub redis: bool,
    pub uptime_secs: u64,
}

/// 503 when either backing store is down, so load balancers drain the node.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check: database unreachable: {}", e);
            false
        }
    };
    let redis = match state.redis.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: redis unreachable: {:#}", e);
            false
        }
    };

    let healthy = database && redis;
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(Health {
            status: if healthy { "ok" } else { "degraded" },
            database,
            redis,
            uptime_secs: state.started_at.elapsed().as_secs(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct Version {
    pub name: &'static str,
    pub version: &'static str,
}

pub async fn version() -> Json<Version> {
    Json(Version {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn metrics(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let body = state.metrics.render().map_err(|e| AppError::Internal(e.into()))?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
