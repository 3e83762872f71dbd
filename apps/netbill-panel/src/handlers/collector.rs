use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use netbill_db::models::collector::{CollectorVisit, VisitStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::auth::Claims;
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::services::collector_service::{SetoranReport, VisitBatch, VisitInput};

#[derive(Debug, Deserialize)]
pub struct VisitQuery {
    pub status: Option<VisitStatus>,
    pub collector_id: Option<Uuid>,
}

pub async fn list_visits(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<VisitQuery>,
) -> AppResult<Json<Vec<CollectorVisit>>> {
    Ok(Json(state.collector.list(tenant.id, query.status, query.collector_id).await?))
}

/// The calling user is the collector.
pub async fn visit_success(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<VisitInput>,
) -> AppResult<(StatusCode, Json<CollectorVisit>)> {
    let visit = state.collector.visit_success(tenant.id, claims.user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(visit)))
}

pub async fn confirm_setoran(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<VisitBatch>,
) -> AppResult<Json<SetoranReport>> {
    let report = state
        .collector
        .confirm_setoran(tenant.id, claims.user_id, &payload.visit_ids)
        .await?;
    Ok(Json(report))
}

pub async fn confirm_deposit(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<VisitBatch>,
) -> AppResult<Json<Vec<CollectorVisit>>> {
    let visits = state
        .collector
        .confirm_deposit(tenant.id, claims.user_id, &payload.visit_ids)
        .await?;
    Ok(Json(visits))
}
