use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{Datelike, NaiveDate, Utc};
use netbill_db::models::invoice::{Invoice, InvoiceStatus};
use netbill_db::repositories::invoice_repo::InvoiceFilter;
use serde::Deserialize;
use uuid::Uuid;

use super::Page;
use crate::AppState;
use crate::auth::Claims;
use crate::error::AppResult;
use crate::middleware::TenantContext;
use crate::services::billing_service::{
    CreateInvoiceInput, InvoiceDetail, MatrixFilter, MatrixRow, MonthlySummary, PaymentReceipt, RecordPaymentInput,
};

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub period_from: Option<NaiveDate>,
    pub period_to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(payload): Json<CreateInvoiceInput>,
) -> AppResult<(StatusCode, Json<Invoice>)> {
    let invoice = state.billing.create_invoice(tenant.id, payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<InvoiceQuery>,
) -> AppResult<Json<Vec<Invoice>>> {
    let filter = InvoiceFilter {
        client_id: query.client_id,
        status: query.status,
        period_from: query.period_from,
        period_to: query.period_to,
    };
    let page = Page {
        limit: query.limit,
        offset: query.offset,
    };
    let invoices = state
        .billing
        .list_invoices(tenant.id, &filter, page.limit(), page.offset(), Utc::now())
        .await?;
    Ok(Json(invoices))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InvoiceDetail>> {
    Ok(Json(state.billing.get_invoice(tenant.id, id).await?))
}

pub async fn cancel_invoice(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(state.billing.cancel_invoice(tenant.id, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct MatrixQuery {
    pub year: Option<i32>,
    pub client_name: Option<String>,
    pub group_id: Option<Uuid>,
    pub status: Option<String>,
}

/// One row per client, twelve cells per row.
pub async fn payment_matrix(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<MatrixQuery>,
) -> AppResult<Json<Vec<MatrixRow>>> {
    let now = Utc::now();
    let filter = MatrixFilter {
        client_name: query.client_name.filter(|s| !s.trim().is_empty()),
        group_id: query.group_id,
        status: query.status.filter(|s| !s.is_empty()),
    };
    let year = query.year.unwrap_or_else(|| now.year());
    Ok(Json(state.billing.payment_matrix(tenant.id, year, &filter, now).await?))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

pub async fn monthly_summary(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<SummaryQuery>,
) -> AppResult<Json<MonthlySummary>> {
    let now = Utc::now();
    let year = query.year.unwrap_or_else(|| now.year());
    let month = query.month.unwrap_or_else(|| now.month());
    Ok(Json(state.billing.monthly_summary(tenant.id, year, month, now).await?))
}

pub async fn record_payment(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<RecordPaymentInput>,
) -> AppResult<(StatusCode, Json<PaymentReceipt>)> {
    let receipt = state.billing.record_payment(tenant.id, payload, claims.user_id).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
