use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use netbill_db::models::router::PppoeSecret;
use netbill_shared::api::StatusEnvelope;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::services::router_sync_service::{CreateSecretInput, SyncAction, UpdateSecretInput};

#[derive(Debug, Deserialize)]
pub struct SecretQuery {
    pub router_id: Option<Uuid>,
}

pub async fn list_secrets(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<SecretQuery>,
) -> AppResult<Json<Vec<PppoeSecret>>> {
    Ok(Json(state.router_sync.list_secrets(tenant.id, query.router_id).await?))
}

pub async fn get_secret(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PppoeSecret>> {
    Ok(Json(state.router_sync.get_secret(tenant.id, id).await?))
}

/// Saved locally first; a router that cannot be reached does not fail the call.
pub async fn create_secret(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateSecretInput>,
) -> AppResult<(StatusCode, Json<PppoeSecret>)> {
    let secret = state.router_sync.create_secret(tenant.id, payload).await?;
    Ok((StatusCode::CREATED, Json(secret)))
}

pub async fn update_secret(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSecretInput>,
) -> AppResult<Json<PppoeSecret>> {
    Ok(Json(state.router_sync.update_secret(tenant.id, id, payload).await?))
}

#[derive(Debug, Deserialize)]
pub struct ToggleInput {
    pub disabled: bool,
}

pub async fn toggle_secret(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ToggleInput>,
) -> AppResult<Json<PppoeSecret>> {
    Ok(Json(state.router_sync.toggle_secret(tenant.id, id, payload.disabled).await?))
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StatusEnvelope>> {
    state.router_sync.delete_secret(tenant.id, id).await?;
    Ok(Json(StatusEnvelope::ok("PPPoE secret deleted")))
}

/// Explicit push; router failures surface to the caller.
pub async fn sync_secret(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SyncAction>> {
    Ok(Json(state.router_sync.sync_secret(tenant.id, id).await?))
}
