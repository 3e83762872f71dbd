use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use netbill_db::models::client::{Client, ClientCategory, ClientStatus, PaymentTempoTemplate, ServicePackage};
use netbill_db::repositories::client_repo::ClientFilter;
use netbill_shared::api::StatusEnvelope;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Page;
use crate::AppState;
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::services::client_service::{CreateClientInput, StatusChangeInput, UpdateClientInput};

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    pub search: Option<String>,
    pub status: Option<ClientStatus>,
    pub group_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_clients(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<ClientQuery>,
) -> AppResult<Json<Vec<Client>>> {
    let filter = ClientFilter {
        search: query.search.filter(|s| !s.trim().is_empty()),
        status: query.status,
        group_id: query.group_id,
    };
    let page = Page {
        limit: query.limit,
        offset: query.offset,
    };
    let clients = state.clients.list(tenant.id, &filter, page.limit(), page.offset()).await?;
    Ok(Json(clients))
}

pub async fn get_client(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Client>> {
    Ok(Json(state.clients.get(tenant.id, id).await?))
}

pub async fn create_client(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateClientInput>,
) -> AppResult<(StatusCode, Json<Client>)> {
    let client = state.clients.create(tenant.id, payload).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn update_client(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateClientInput>,
) -> AppResult<Json<Client>> {
    Ok(Json(state.clients.update(tenant.id, id, payload).await?))
}

pub async fn change_status(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChangeInput>,
) -> AppResult<Json<Client>> {
    Ok(Json(state.clients.change_status(tenant.id, id, payload).await?))
}

pub async fn delete_client(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StatusEnvelope>> {
    state.clients.delete(tenant.id, id).await?;
    Ok(Json(StatusEnvelope::ok("client deleted")))
}

// --- Catalogue ---

#[derive(Debug, Deserialize)]
pub struct CreatePackage {
    pub name: String,
    pub category: ClientCategory,
    pub monthly_fee: i64,
    #[serde(default)]
    pub profile_id: Option<Uuid>,
}

pub async fn list_packages(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
) -> AppResult<Json<Vec<ServicePackage>>> {
    Ok(Json(state.clients.list_packages(tenant.id).await?))
}

pub async fn create_package(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreatePackage>,
) -> AppResult<(StatusCode, Json<ServicePackage>)> {
    let package = state
        .clients
        .create_package(tenant.id, &payload.name, payload.category, payload.monthly_fee, payload.profile_id)
        .await?;
    Ok((StatusCode::CREATED, Json(package)))
}

#[derive(Debug, Deserialize)]
pub struct CreateTempoTemplate {
    pub name: String,
    pub due_day: i32,
}

pub async fn create_tempo_template(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateTempoTemplate>,
) -> AppResult<(StatusCode, Json<PaymentTempoTemplate>)> {
    let template = state
        .clients
        .create_tempo_template(tenant.id, &payload.name, payload.due_day)
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

#[derive(Debug, Deserialize)]
pub struct CreateGroup {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct GroupCreated {
    pub id: Uuid,
    pub name: String,
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateGroup>,
) -> AppResult<(StatusCode, Json<GroupCreated>)> {
    let id = state.clients.create_group(tenant.id, &payload.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(GroupCreated {
            id,
            name: payload.name.trim().to_string(),
        }),
    ))
}
