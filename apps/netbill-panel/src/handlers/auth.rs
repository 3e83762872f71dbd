use axum::{Extension, Json, extract::State, http::StatusCode};
use netbill_db::models::user::User;
use netbill_shared::api::StatusEnvelope;

use crate::AppState;
use crate::auth::{Claims, TokenPair};
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::services::auth_service::{ChangePasswordInput, LoginInput, RefreshInput, RegisterInput, Registration, Session};

/// Creates the tenant, its owner and a trial plan in one go.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterInput>,
) -> AppResult<(StatusCode, Json<Registration>)> {
    let registration = state.auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// Without a tenant in the request only platform accounts can sign in.
pub async fn login(
    State(state): State<AppState>,
    tenant: Option<Extension<TenantContext>>,
    Json(payload): Json<LoginInput>,
) -> AppResult<Json<Session>> {
    let tenant_id = tenant.map(|Extension(ctx)| ctx.id);
    Ok(Json(state.auth.login(tenant_id, payload).await?))
}

pub async fn refresh(State(state): State<AppState>, Json(payload): Json<RefreshInput>) -> AppResult<Json<TokenPair>> {
    Ok(Json(state.auth.refresh(payload).await?))
}

pub async fn logout(State(state): State<AppState>, Json(payload): Json<RefreshInput>) -> AppResult<Json<StatusEnvelope>> {
    state.auth.logout(payload).await?;
    Ok(Json(StatusEnvelope::ok("logged out")))
}

pub async fn me(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> AppResult<Json<User>> {
    Ok(Json(state.auth.me(&claims).await?))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordInput>,
) -> AppResult<Json<StatusEnvelope>> {
    state.auth.change_password(&claims, payload).await?;
    Ok(Json(StatusEnvelope::ok("password changed")))
}
