use axum::{Extension, Json, extract::State};
use netbill_db::models::radius::RadiusSession;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::services::radius_service::{AccountingRequest, AuthDecision, AuthRequest};

/// Called by the RADIUS server, not by panel users. The NAS picks the tenant.
pub async fn authenticate(State(state): State<AppState>, Json(payload): Json<AuthRequest>) -> AppResult<Json<AuthDecision>> {
    Ok(Json(state.radius.authenticate(payload).await?))
}

pub async fn accounting(
    State(state): State<AppState>,
    Json(payload): Json<AccountingRequest>,
) -> AppResult<Json<RadiusSession>> {
    Ok(Json(state.radius.accounting(payload).await?))
}

pub async fn open_sessions(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
) -> AppResult<Json<Vec<RadiusSession>>> {
    Ok(Json(state.radius.open_sessions(tenant.id).await?))
}
