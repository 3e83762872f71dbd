use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use netbill_db::models::campaign::{Campaign, Recipient, RecipientStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Page;
use crate::AppState;
use crate::error::AppResult;
use crate::middleware::TenantContext;

#[derive(Debug, Deserialize)]
pub struct CreateCampaign {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub group_id: Option<Uuid>,
}

/// Responds once every recipient is persisted and queued; sending happens
/// in the worker pool.
pub async fn create_campaign(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateCampaign>,
) -> AppResult<(StatusCode, Json<Campaign>)> {
    let campaign = state
        .campaigns
        .create_and_enqueue(tenant.id, &payload.name, &payload.message, payload.group_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(page): Query<Page>,
) -> AppResult<Json<Vec<Campaign>>> {
    Ok(Json(state.campaigns.list(tenant.id, page.limit(), page.offset()).await?))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.campaigns.get(tenant.id, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RecipientQuery {
    pub status: Option<RecipientStatus>,
}

pub async fn list_recipients(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<RecipientQuery>,
) -> AppResult<Json<Vec<Recipient>>> {
    Ok(Json(state.campaigns.recipients(tenant.id, id, query.status).await?))
}

#[derive(Debug, Serialize)]
pub struct RetryResult {
    pub campaign: Campaign,
    pub requeued: usize,
}

pub async fn retry_failed(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RetryResult>> {
    let (campaign, requeued) = state.campaigns.retry_failed(tenant.id, id).await?;
    Ok(Json(RetryResult { campaign, requeued }))
}

pub async fn cancel_campaign(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.campaigns.cancel(tenant.id, id).await?))
}
