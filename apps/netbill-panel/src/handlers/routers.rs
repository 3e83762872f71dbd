use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use netbill_db::models::router::{NetworkProfile, Router};
use netbill_shared::api::StatusEnvelope;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::mikrotik::ActiveSession;
use crate::services::router_sync_service::{ConnectionReport, CreateProfileInput, CreateRouterInput};

pub async fn create_router(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateRouterInput>,
) -> AppResult<(StatusCode, Json<Router>)> {
    let router = state.router_sync.create_router(tenant.id, payload).await?;
    Ok((StatusCode::CREATED, Json(router)))
}

pub async fn list_routers(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
) -> AppResult<Json<Vec<Router>>> {
    Ok(Json(state.router_sync.list_routers(tenant.id).await?))
}

pub async fn get_router(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Router>> {
    Ok(Json(state.router_sync.get_router(tenant.id, id).await?))
}

/// Logs in, reads the identity and records the outcome on the router row.
pub async fn test_connection(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConnectionReport>> {
    Ok(Json(state.router_sync.test_connection(tenant.id, id).await?))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<ActiveSession>>> {
    Ok(Json(state.router_sync.list_sessions(tenant.id, id).await?))
}

pub async fn disconnect_session(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path((id, session_id)): Path<(Uuid, String)>,
) -> AppResult<Json<StatusEnvelope>> {
    state.router_sync.disconnect_session(tenant.id, id, &session_id).await?;
    Ok(Json(StatusEnvelope::ok("session disconnected")))
}

pub async fn list_profiles(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
) -> AppResult<Json<Vec<NetworkProfile>>> {
    Ok(Json(state.router_sync.list_profiles(tenant.id).await?))
}

pub async fn create_profile(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateProfileInput>,
) -> AppResult<(StatusCode, Json<NetworkProfile>)> {
    let profile = state.router_sync.create_profile(tenant.id, payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}
