use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use netbill_db::models::topology::{NodeKind, OutageEvent, TopologyLink};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::services::outage_service::{LinkInput, OutageInput};

#[derive(Debug, Deserialize)]
pub struct CreateNode {
    pub name: String,
    /// Only meaningful for ODPs.
    #[serde(default)]
    pub odc_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct NodeCreated {
    pub id: Uuid,
    pub kind: NodeKind,
}

pub async fn create_odc(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateNode>,
) -> AppResult<(StatusCode, Json<NodeCreated>)> {
    let id = state.outages.create_odc(tenant.id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(NodeCreated { id, kind: NodeKind::Odc })))
}

pub async fn create_odp(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateNode>,
) -> AppResult<(StatusCode, Json<NodeCreated>)> {
    let id = state.outages.create_odp(tenant.id, payload.odc_id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(NodeCreated { id, kind: NodeKind::Odp })))
}

pub async fn create_link(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<LinkInput>,
) -> AppResult<(StatusCode, Json<TopologyLink>)> {
    let link = state.outages.link(tenant.id, payload).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn open_outage(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<OutageInput>,
) -> AppResult<(StatusCode, Json<OutageEvent>)> {
    let outage = state.outages.open(tenant.id, payload).await?;
    Ok((StatusCode::CREATED, Json(outage)))
}

pub async fn resolve_outage(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OutageEvent>> {
    Ok(Json(state.outages.resolve(tenant.id, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct OutageQuery {
    #[serde(default)]
    pub open: bool,
}

pub async fn list_outages(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<OutageQuery>,
) -> AppResult<Json<Vec<OutageEvent>>> {
    Ok(Json(state.outages.list(tenant.id, query.open).await?))
}
