//! Platform operator endpoints. Never tenant-scoped.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use netbill_db::models::plan::FeatureToggle;
use netbill_db::models::tenant::{Tenant, TenantStatus};
use netbill_db::repositories::client_repo::ClientRepository;
use netbill_db::repositories::router_repo::RouterRepository;
use netbill_shared::api::StatusEnvelope;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::Page;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::features::{KNOWN_FEATURES, LIMIT_MAX_CLIENTS, LIMIT_MAX_ROUTERS, LimitUsage};

pub async fn list_tenants(State(state): State<AppState>, Query(page): Query<Page>) -> AppResult<Json<Vec<Tenant>>> {
    Ok(Json(state.tenants.list(page.limit(), page.offset()).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusInput {
    pub status: TenantStatus,
}

/// Suspended tenants are rejected by the tenant resolver on their next request.
pub async fn set_tenant_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusInput>,
) -> AppResult<Json<Tenant>> {
    if state.tenants.get_by_id(id).await?.is_none() {
        return Err(AppError::NotFound("tenant not found".into()));
    }
    state.tenants.update_status(id, payload.status).await?;
    info!("Tenant {} set to {}", id, payload.status);
    let tenant = state
        .tenants
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("tenant not found".into()))?;
    Ok(Json(tenant))
}

#[derive(Debug, Serialize)]
pub struct FeatureState {
    pub code: &'static str,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct Entitlements {
    pub tenant_id: Uuid,
    pub features: Vec<FeatureState>,
    pub limits: Vec<LimitUsage>,
}

pub async fn tenant_entitlements(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Entitlements>> {
    if state.tenants.get_by_id(id).await?.is_none() {
        return Err(AppError::NotFound("tenant not found".into()));
    }

    let mut features = Vec::with_capacity(KNOWN_FEATURES.len());
    for &code in KNOWN_FEATURES {
        features.push(FeatureState {
            code,
            enabled: state.features.has(id, code).await,
        });
    }

    let clients = ClientRepository::new(state.pool.clone()).count(id).await?;
    let routers = RouterRepository::new(state.pool.clone()).count(id).await?;
    let limits = vec![
        state.features.usage(id, LIMIT_MAX_CLIENTS, clients).await,
        state.features.usage(id, LIMIT_MAX_ROUTERS, routers).await,
    ];

    Ok(Json(Entitlements {
        tenant_id: id,
        features,
        limits,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ToggleInput {
    pub code: String,
    /// Absent for a global toggle.
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    pub is_enabled: bool,
}

pub async fn upsert_toggle(State(state): State<AppState>, Json(payload): Json<ToggleInput>) -> AppResult<Json<FeatureToggle>> {
    let code = payload.code.trim();
    if code.is_empty() {
        return Err(AppError::InputInvalid("code is required".into()));
    }
    let toggle = state
        .entitlements
        .upsert_toggle(payload.tenant_id, code, payload.is_enabled)
        .await?;
    info!(
        "Feature toggle {} ({}) set to {}",
        code,
        payload.tenant_id.map_or_else(|| "global".to_string(), |t| t.to_string()),
        payload.is_enabled
    );
    Ok(Json(toggle))
}

#[derive(Debug, Deserialize)]
pub struct ToggleKey {
    pub code: String,
    pub tenant_id: Option<Uuid>,
}

pub async fn delete_toggle(State(state): State<AppState>, Query(key): Query<ToggleKey>) -> AppResult<Json<StatusEnvelope>> {
    if !state.entitlements.delete_toggle(key.tenant_id, key.code.trim()).await? {
        return Err(AppError::NotFound("feature toggle not found".into()));
    }
    Ok(Json(StatusEnvelope::ok("feature toggle removed")))
}

#[derive(Debug, Deserialize)]
pub struct AddonInput {
    pub addon_code: String,
    #[serde(default = "one")]
    pub quantity: i32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Serialize)]
pub struct AddonAttached {
    pub tenant_addon_id: Uuid,
}

pub async fn attach_addon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddonInput>,
) -> AppResult<(StatusCode, Json<AddonAttached>)> {
    if payload.quantity < 1 {
        return Err(AppError::InputInvalid("quantity must be at least 1".into()));
    }
    if state.tenants.get_by_id(id).await?.is_none() {
        return Err(AppError::NotFound("tenant not found".into()));
    }
    let tenant_addon_id = state
        .entitlements
        .attach_addon(id, payload.addon_code.trim(), payload.quantity, payload.expires_at)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("addon '{}' not found", payload.addon_code.trim())))?;
    info!("Addon {} x{} attached to tenant {}", payload.addon_code.trim(), payload.quantity, id);
    Ok((StatusCode::CREATED, Json(AddonAttached { tenant_addon_id })))
}
