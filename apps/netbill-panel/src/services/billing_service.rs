use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use netbill_db::models::client::Client;
use netbill_db::models::invoice::{
    Invoice, InvoiceItem, InvoiceStatus, InvoiceStatusTotals, NewInvoice, NewInvoiceItem, NewPayment, Payment,
    PaymentMethod, month_key,
};
use netbill_db::models::tenant::{ServiceDiscount, Tenant};
use netbill_db::repositories::client_repo::ClientRepository;
use netbill_db::repositories::invoice_repo::{InvoiceFilter, InvoiceRepository};
use netbill_db::repositories::payment_repo::PaymentRepository;
use netbill_db::repositories::tenant_repo::TenantRepository;
use netbill_db::sqlx::{Postgres, Transaction};
use netbill_db::utils::anyhow_is_unique_violation;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::isolation_service::IsolationService;
use crate::metrics::Metrics;

const NUMBER_ATTEMPTS: usize = 3;
const DAILY_PAGE_SIZE: i64 = 200;
const DEFAULT_CURRENCY: &str = "IDR";

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("invoice not found")]
    InvoiceNotFound,
    #[error("client not found")]
    ClientNotFound,
    #[error("invoice is already paid")]
    InvoiceAlreadyPaid,
    #[error("invoice is cancelled")]
    InvoiceCancelled,
    #[error("invoice cannot be cancelled")]
    NotCancellable,
    #[error("could not allocate an invoice number")]
    NumberConflict,
    #[error("payment exceeds the outstanding amount of {outstanding}")]
    Overpayment { outstanding: i64 },
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceInput {
    pub client_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<NewInvoiceItem>,
    #[serde(default)]
    pub tax_percent: Option<f64>,
    #[serde(default)]
    pub discount_amount: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordPaymentInput {
    pub invoice_id: Uuid,
    pub amount: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub collector_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub invoice: Invoice,
    pub client_reactivated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub discount_amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
}

/// Subtotal, then discount (tenant default plus explicit, clamped), then tax on the remainder.
pub fn compute_totals(
    items: &[NewInvoiceItem],
    service_discount: Option<&ServiceDiscount>,
    extra_discount: i64,
    tax_percent: f64,
) -> Totals {
    let subtotal: i64 = items.iter().map(NewInvoiceItem::amount).sum();
    let default_discount = service_discount.map(|d| d.amount_for(subtotal)).unwrap_or(0);
    let discount_amount = (default_discount + extra_discount.max(0)).clamp(0, subtotal.max(0));
    let taxable = subtotal - discount_amount;
    let tax_amount = (taxable as f64 * tax_percent.max(0.0) / 100.0).round() as i64;
    Totals {
        subtotal,
        discount_amount,
        tax_amount,
        total_amount: taxable + tax_amount,
    }
}

fn validate_invoice_input(input: &CreateInvoiceInput) -> Result<(), BillingError> {
    if input.items.is_empty() {
        return Err(BillingError::InvalidInput("at least one line item is required".into()));
    }
    for item in &input.items {
        if item.description.trim().is_empty() {
            return Err(BillingError::InvalidInput("line item description is required".into()));
        }
        if item.quantity < 1 || item.unit_price < 0 {
            return Err(BillingError::InvalidInput(
                "line item quantity must be positive and price non-negative".into(),
            ));
        }
    }
    if input.period_end < input.period_start {
        return Err(BillingError::InvalidInput("period_end is before period_start".into()));
    }
    if let Some(tax) = input.tax_percent {
        if !(0.0..=100.0).contains(&tax) {
            return Err(BillingError::InvalidInput("tax_percent must be within 0..=100".into()));
        }
    }
    if input.discount_amount.is_some_and(|d| d < 0) {
        return Err(BillingError::InvalidInput("discount_amount cannot be negative".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Partial { paid_amount: i64 },
    Paid,
}

/// Decides what a payment does to an invoice given the amount already paid.
pub fn check_payment(
    invoice: &Invoice,
    existing: i64,
    amount: i64,
    method: PaymentMethod,
) -> Result<Settlement, BillingError> {
    match invoice.status {
        InvoiceStatus::Paid => return Err(BillingError::InvoiceAlreadyPaid),
        InvoiceStatus::Cancelled => return Err(BillingError::InvoiceCancelled),
        _ => {}
    }
    if amount == 0 {
        return Err(BillingError::InvalidInput("amount must not be zero".into()));
    }
    if amount < 0 && method != PaymentMethod::Adjustment {
        return Err(BillingError::InvalidInput(
            "negative amounts are only allowed for adjustments".into(),
        ));
    }

    let new_sum = existing + amount;
    if new_sum > invoice.total_amount {
        return Err(BillingError::Overpayment {
            outstanding: (invoice.total_amount - existing).max(0),
        });
    }
    if new_sum < 0 {
        return Err(BillingError::InvalidInput("adjustment exceeds the amount paid".into()));
    }
    if new_sum == invoice.total_amount {
        Ok(Settlement::Paid)
    } else {
        Ok(Settlement::Partial { paid_amount: new_sum })
    }
}

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((first, last))
}

/// Clamps a configured due day to the length of the given month.
pub fn effective_due_day(due_day: i32, year: i32, month: u32) -> u32 {
    let last = month_bounds(year, month).map(|(_, end)| end.day()).unwrap_or(28);
    (due_day.clamp(1, 31) as u32).min(last)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceWindow {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
}

/// The invoice a client is owed by the daily run on `today`, if any.
///
/// Fires when tomorrow is the client's (clamped) due day; bills the month
/// after tomorrow's month, due tomorrow.
pub fn invoice_window_for(today: NaiveDate, due_day: i32) -> Option<InvoiceWindow> {
    let tomorrow = today.succ_opt()?;
    if tomorrow.day() != effective_due_day(due_day, tomorrow.year(), tomorrow.month()) {
        return None;
    }
    let next_month = tomorrow.with_day(1)?.checked_add_months(Months::new(1))?;
    let (period_start, period_end) = month_bounds(next_month.year(), next_month.month())?;
    Some(InvoiceWindow {
        period_start,
        period_end,
        due_date: tomorrow,
    })
}

pub fn local_today(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Last second of `date` in tenant-local time, as an instant.
pub fn end_of_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN) + Duration::days(1) - Duration::seconds(1);
    offset
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

fn start_of_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    offset
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

netbill_db::string_enum!(MatrixStatus {
    PaidOnTime => "paid_on_time",
    PaidLate => "paid_late",
    Overdue => "overdue",
    Pending => "pending",
    Cancelled => "cancelled",
    Empty => "empty",
});

pub fn matrix_cell(
    status: InvoiceStatus,
    due_date: NaiveDate,
    paid_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> MatrixStatus {
    let deadline = end_of_day(due_date, offset);
    match status {
        InvoiceStatus::Paid if paid_at.is_some_and(|at| at <= deadline) => MatrixStatus::PaidOnTime,
        InvoiceStatus::Paid => MatrixStatus::PaidLate,
        InvoiceStatus::Cancelled => MatrixStatus::Cancelled,
        InvoiceStatus::Overdue => MatrixStatus::Overdue,
        InvoiceStatus::Draft | InvoiceStatus::Pending if now > deadline => MatrixStatus::Overdue,
        InvoiceStatus::Draft | InvoiceStatus::Pending => MatrixStatus::Pending,
    }
}

/// `paid` covers both paid cells and `draft` maps onto `pending`.
pub fn matrix_status_filter(raw: &str) -> Result<Vec<MatrixStatus>, BillingError> {
    match raw {
        "paid" => Ok(vec![MatrixStatus::PaidOnTime, MatrixStatus::PaidLate]),
        "draft" => Ok(vec![MatrixStatus::Pending]),
        other => other
            .parse::<MatrixStatus>()
            .map(|s| vec![s])
            .map_err(|_| BillingError::InvalidInput(format!("unknown matrix status '{}'", other))),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatrixFilter {
    pub client_name: Option<String>,
    pub group_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixCell {
    pub month: u32,
    pub status: MatrixStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixRow {
    pub client_id: Uuid,
    pub client_code: String,
    pub name: String,
    pub months: Vec<MatrixCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub by_status: Vec<InvoiceStatusTotals>,
    pub invoice_count: i64,
    pub total_billed: i64,
    pub total_collected: i64,
    pub outstanding: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyRunStats {
    pub tenants: u64,
    pub scanned: u64,
    pub created: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl DailyRunStats {
    fn merge(&mut self, other: DailyRunStats) {
        self.tenants += other.tenants;
        self.scanned += other.scanned;
        self.created += other.created;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

pub struct BillingService {
    tenants: TenantRepository,
    clients: ClientRepository,
    invoices: InvoiceRepository,
    payments: PaymentRepository,
    isolation: Arc<IsolationService>,
    metrics: Arc<Metrics>,
    default_offset_minutes: i32,
}

impl BillingService {
    pub fn new(
        tenants: TenantRepository,
        clients: ClientRepository,
        invoices: InvoiceRepository,
        payments: PaymentRepository,
        isolation: Arc<IsolationService>,
        metrics: Arc<Metrics>,
        default_offset_minutes: i32,
    ) -> Self {
        Self {
            tenants,
            clients,
            invoices,
            payments,
            isolation,
            metrics,
            default_offset_minutes,
        }
    }

    pub fn offset_for(&self, tenant: &Tenant) -> FixedOffset {
        tenant.settings.offset(self.default_offset_minutes)
    }

    async fn load_tenant(&self, tenant_id: Uuid) -> Result<Tenant, BillingError> {
        self.tenants
            .get_by_id(tenant_id)
            .await?
            .ok_or_else(|| BillingError::Internal(anyhow!("tenant {} not found", tenant_id)))
    }

    // --- Creation ---

    pub async fn create_invoice(
        &self,
        tenant_id: Uuid,
        input: CreateInvoiceInput,
        now: DateTime<Utc>,
    ) -> Result<Invoice, BillingError> {
        validate_invoice_input(&input)?;
        let tenant = self.load_tenant(tenant_id).await?;
        self.clients
            .get(tenant_id, input.client_id)
            .await?
            .ok_or(BillingError::ClientNotFound)?;

        let settings = &tenant.settings;
        let totals = compute_totals(
            &input.items,
            settings.service_discount.as_ref(),
            input.discount_amount.unwrap_or(0),
            input.tax_percent.or(settings.default_tax_percent).unwrap_or(0.0),
        );
        let invoice = NewInvoice {
            tenant_id,
            client_id: input.client_id,
            period_start: input.period_start,
            period_end: input.period_end,
            due_date: input.due_date,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
            currency: settings.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            notes: input.notes,
            items: input.items,
        };
        let key = month_key(local_today(now, self.offset_for(&tenant)));
        self.insert_numbered(&invoice, &key).await
    }

    /// Count-based numbering under a per-month advisory lock. A unique
    /// violation (lock bypassed or manual insert) gets a fresh number.
    /// Zero-total invoices are stored paid and settle the client right away.
    async fn insert_numbered(&self, invoice: &NewInvoice, key: &str) -> Result<Invoice, BillingError> {
        for attempt in 1..=NUMBER_ATTEMPTS {
            let mut tx = self
                .invoices
                .pool()
                .begin()
                .await
                .context("Failed to open invoice transaction")?;
            let number = self.invoices.next_number_tx(&mut tx, invoice.tenant_id, key).await?;

            match self.invoices.insert_tx(&mut tx, invoice, &number, Utc::now()).await {
                Ok(created) => {
                    tx.commit().await.context("Failed to commit invoice")?;
                    Metrics::incr(&self.metrics.invoices_created);
                    info!(
                        "🧾 Invoice {} created for client {} ({})",
                        created.invoice_number, created.client_id, created.total_amount
                    );
                    if created.status == InvoiceStatus::Paid {
                        self.after_paid(&created).await;
                    }
                    return Ok(created);
                }
                Err(e) if anyhow_is_unique_violation(&e) => {
                    warn!(
                        "Invoice number {} already taken (attempt {}/{})",
                        number, attempt, NUMBER_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BillingError::NumberConflict)
    }

    // --- Queries ---

    pub async fn get_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<InvoiceDetail, BillingError> {
        let invoice = self
            .invoices
            .get(tenant_id, invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound)?;
        let items = self.invoices.items(tenant_id, invoice_id).await?;
        let payments = self.payments.list_for_invoice(tenant_id, invoice_id).await?;
        Ok(InvoiceDetail { invoice, items, payments })
    }

    pub async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &InvoiceFilter,
        limit: i64,
        offset: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, BillingError> {
        self.promote_overdue(tenant_id, now).await?;
        Ok(self.invoices.list(tenant_id, filter, limit, offset).await?)
    }

    async fn promote_overdue(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<FixedOffset, BillingError> {
        let tenant = self.load_tenant(tenant_id).await?;
        let offset = self.offset_for(&tenant);
        let promoted = self.invoices.promote_overdue(tenant_id, local_today(now, offset)).await?;
        if promoted > 0 {
            info!("Marked {} invoices overdue for tenant {}", promoted, tenant_id);
        }
        Ok(offset)
    }

    // --- Payments ---

    pub async fn record_payment(
        &self,
        tenant_id: Uuid,
        input: RecordPaymentInput,
        created_by: Uuid,
    ) -> Result<PaymentReceipt, BillingError> {
        let mut tx = self
            .invoices
            .pool()
            .begin()
            .await
            .context("Failed to open payment transaction")?;
        let (payment, invoice, settled) = self.apply_payment_tx(&mut tx, tenant_id, &input, created_by).await?;
        tx.commit().await.context("Failed to commit payment")?;

        let client_reactivated = if settled { self.after_paid(&invoice).await } else { false };
        Ok(PaymentReceipt {
            payment,
            invoice,
            client_reactivated,
        })
    }

    /// Applies a payment inside the caller's transaction. The bool is true
    /// when the invoice became paid; the caller then owes `after_paid`.
    pub async fn apply_payment_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        input: &RecordPaymentInput,
        created_by: Uuid,
    ) -> Result<(Payment, Invoice, bool), BillingError> {
        let invoice = self
            .invoices
            .get_for_update_tx(tx, tenant_id, input.invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound)?;
        let existing = self.payments.sum_for_invoice_tx(tx, tenant_id, invoice.id).await?;
        let settlement = check_payment(&invoice, existing, input.amount, input.method)?;

        let received_at = input.received_at.unwrap_or_else(Utc::now);
        let payment = self
            .payments
            .insert_tx(
                tx,
                &NewPayment {
                    tenant_id,
                    invoice_id: invoice.id,
                    client_id: invoice.client_id,
                    amount: input.amount,
                    method: input.method,
                    reference: input.reference.clone(),
                    collector_id: input.collector_id,
                    notes: input.notes.clone(),
                    received_at,
                    created_by_user_id: created_by,
                },
            )
            .await?;

        let (invoice, settled) = match settlement {
            Settlement::Paid => (
                self.invoices
                    .mark_paid_tx(tx, invoice.id, invoice.total_amount, received_at)
                    .await?,
                true,
            ),
            Settlement::Partial { paid_amount } => {
                (self.invoices.set_paid_amount_tx(tx, invoice.id, paid_amount).await?, false)
            }
        };
        Metrics::incr(&self.metrics.payments_recorded);
        Ok((payment, invoice, settled))
    }

    /// Signals the isolation controller. Failures are logged; the payment stands.
    pub async fn after_paid(&self, invoice: &Invoice) -> bool {
        let today = match self.tenants.get_by_id(invoice.tenant_id).await {
            Ok(Some(tenant)) => local_today(Utc::now(), self.offset_for(&tenant)),
            _ => local_today(Utc::now(), FixedOffset::east_opt(self.default_offset_minutes * 60).unwrap_or(Utc.fix())),
        };
        match self
            .isolation
            .on_invoice_paid(invoice.tenant_id, invoice.client_id, invoice.id, today)
            .await
        {
            Ok(reactivated) => reactivated,
            Err(e) => {
                warn!("Unisolir check failed for invoice {}: {:#}", invoice.invoice_number, e);
                false
            }
        }
    }

    pub async fn cancel_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Invoice, BillingError> {
        let mut tx = self
            .invoices
            .pool()
            .begin()
            .await
            .context("Failed to open cancel transaction")?;
        let invoice = self
            .invoices
            .get_for_update_tx(&mut tx, tenant_id, invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound)?;
        if !invoice.status.is_open() {
            return Err(BillingError::NotCancellable);
        }
        if self.payments.sum_for_invoice_tx(&mut tx, tenant_id, invoice_id).await? != 0 {
            return Err(BillingError::NotCancellable);
        }
        let cancelled = self
            .invoices
            .set_status_tx(&mut tx, invoice_id, InvoiceStatus::Cancelled)
            .await?;
        tx.commit().await.context("Failed to commit invoice cancel")?;
        info!("Invoice {} cancelled", cancelled.invoice_number);
        Ok(cancelled)
    }

    // --- Aggregates ---

    pub async fn payment_matrix(
        &self,
        tenant_id: Uuid,
        year: i32,
        filter: &MatrixFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<MatrixRow>, BillingError> {
        let wanted = filter.status.as_deref().map(matrix_status_filter).transpose()?;
        let year_start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| BillingError::InvalidInput(format!("invalid year {}", year)))?;
        let year_end = NaiveDate::from_ymd_opt(year + 1, 1, 1)
            .ok_or_else(|| BillingError::InvalidInput(format!("invalid year {}", year)))?;

        let offset = self.promote_overdue(tenant_id, now).await?;
        let clients = self
            .invoices
            .matrix_clients(tenant_id, filter.client_name.as_deref(), filter.group_id)
            .await?;
        let invoices = self.invoices.matrix_invoices(tenant_id, year_start, year_end).await?;

        let mut rows: Vec<MatrixRow> = clients
            .into_iter()
            .map(|c| MatrixRow {
                client_id: c.id,
                client_code: c.client_code,
                name: c.name,
                months: (1..=12)
                    .map(|month| MatrixCell {
                        month,
                        status: MatrixStatus::Empty,
                        invoice_id: None,
                        total_amount: None,
                    })
                    .collect(),
            })
            .collect();
        let index: std::collections::HashMap<Uuid, usize> =
            rows.iter().enumerate().map(|(i, r)| (r.client_id, i)).collect();

        for inv in invoices {
            let Some(&row) = index.get(&inv.client_id) else { continue };
            let status = match inv.status.parse::<InvoiceStatus>() {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping invoice {} in matrix: {}", inv.invoice_id, e);
                    continue;
                }
            };
            if !(1..=12).contains(&inv.month) {
                continue;
            }
            let cell = &mut rows[row].months[(inv.month - 1) as usize];
            cell.status = matrix_cell(status, inv.due_date, inv.paid_at, now, offset);
            cell.invoice_id = Some(inv.invoice_id);
            cell.total_amount = Some(inv.total_amount);
        }

        if let Some(wanted) = wanted {
            rows.retain(|r| r.months.iter().any(|c| wanted.contains(&c.status)));
        }
        Ok(rows)
    }

    pub async fn monthly_summary(
        &self,
        tenant_id: Uuid,
        year: i32,
        month: u32,
        now: DateTime<Utc>,
    ) -> Result<MonthlySummary, BillingError> {
        let (first, last) = month_bounds(year, month)
            .ok_or_else(|| BillingError::InvalidInput(format!("invalid month {}-{}", year, month)))?;
        let next = last
            .succ_opt()
            .ok_or_else(|| BillingError::InvalidInput("month out of range".into()))?;

        let offset = self.promote_overdue(tenant_id, now).await?;
        let by_status = self.invoices.status_totals(tenant_id, first, next).await?;
        let total_collected = self
            .payments
            .sum_received_between(tenant_id, start_of_day(first, offset), start_of_day(next, offset))
            .await?;

        let mut summary = MonthlySummary {
            year,
            month,
            by_status: Vec::new(),
            invoice_count: 0,
            total_billed: 0,
            total_collected,
            outstanding: 0,
        };
        for row in &by_status {
            summary.invoice_count += row.count;
            let status = row.status.parse::<InvoiceStatus>().ok();
            if status != Some(InvoiceStatus::Cancelled) {
                summary.total_billed += row.total_amount;
            }
            if status.is_some_and(InvoiceStatus::is_open) {
                summary.outstanding += (row.total_amount - row.paid_amount).max(0);
            }
        }
        summary.by_status = by_status;
        Ok(summary)
    }

    // --- Daily generation ---

    /// One pass over every active tenant, each at its own local date.
    pub async fn run_daily(&self, now: DateTime<Utc>) -> anyhow::Result<DailyRunStats> {
        let mut total = DailyRunStats::default();
        for tenant in self.tenants.list_active().await? {
            let today = local_today(now, self.offset_for(&tenant));
            match self.run_daily_for_tenant(&tenant, today).await {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    total.errors += 1;
                    error!("Daily invoice run failed for tenant {}: {:#}", tenant.slug, e);
                }
            }
        }
        info!(
            "📅 Daily invoice run: tenants={} scanned={} created={} skipped={} errors={}",
            total.tenants, total.scanned, total.created, total.skipped, total.errors
        );
        Ok(total)
    }

    pub async fn run_daily_for_tenant(&self, tenant: &Tenant, today: NaiveDate) -> anyhow::Result<DailyRunStats> {
        let mut stats = DailyRunStats {
            tenants: 1,
            ..Default::default()
        };
        let mut after = None;
        loop {
            let page = self.clients.list_active_page(tenant.id, after, DAILY_PAGE_SIZE).await?;
            let Some(last) = page.last() else { break };
            after = Some(last.id);

            for client in &page {
                stats.scanned += 1;
                let Some(window) = invoice_window_for(today, client.payment_due_day) else {
                    stats.skipped += 1;
                    continue;
                };
                match self.generate_for_client(tenant, client, window, today).await {
                    Ok(true) => stats.created += 1,
                    Ok(false) => stats.skipped += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!("Invoice generation failed for client {}: {}", client.client_code, e);
                    }
                }
            }
            if (page.len() as i64) < DAILY_PAGE_SIZE {
                break;
            }
        }
        Ok(stats)
    }

    async fn generate_for_client(
        &self,
        tenant: &Tenant,
        client: &Client,
        window: InvoiceWindow,
        today: NaiveDate,
    ) -> Result<bool, BillingError> {
        if self
            .invoices
            .exists_for_period(tenant.id, client.id, window.period_start, window.period_end)
            .await?
        {
            return Ok(false);
        }
        let package = self
            .clients
            .get_package(tenant.id, client.service_package_id)
            .await?
            .ok_or_else(|| anyhow!("service package {} not found", client.service_package_id))?;

        let items = vec![NewInvoiceItem {
            description: format!("{} {}", package.name, window.period_start.format("%m/%Y")),
            quantity: 1,
            unit_price: package.monthly_fee,
        }];
        let settings = &tenant.settings;
        let totals = compute_totals(
            &items,
            settings.service_discount.as_ref(),
            0,
            settings.default_tax_percent.unwrap_or(0.0),
        );
        let invoice = NewInvoice {
            tenant_id: tenant.id,
            client_id: client.id,
            period_start: window.period_start,
            period_end: window.period_end,
            due_date: window.due_date,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
            currency: settings.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            notes: None,
            items,
        };
        self.insert_numbered(&invoice, &month_key(today)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbill_db::models::tenant::DiscountKind;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn wib() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn invoice(total: i64, status: InvoiceStatus) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            invoice_number: "INV-202603-0001".into(),
            period_start: d(2026, 3, 1),
            period_end: d(2026, 3, 31),
            due_date: d(2026, 3, 10),
            subtotal: total,
            tax_amount: 0,
            discount_amount: 0,
            total_amount: total,
            paid_amount: 0,
            currency: "IDR".into(),
            status,
            paid_at: None,
            notes: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn second_payment_that_overshoots_is_rejected() {
        let inv = invoice(150_000, InvoiceStatus::Pending);

        let first = check_payment(&inv, 0, 100_000, PaymentMethod::Cash).unwrap();
        assert_eq!(first, Settlement::Partial { paid_amount: 100_000 });

        let second = check_payment(&inv, 100_000, 100_000, PaymentMethod::Cash).unwrap_err();
        assert!(matches!(second, BillingError::Overpayment { outstanding: 50_000 }));
    }

    #[test]
    fn exact_payment_settles_invoice() {
        let inv = invoice(200_000, InvoiceStatus::Overdue);
        assert_eq!(
            check_payment(&inv, 0, 200_000, PaymentMethod::BankTransfer).unwrap(),
            Settlement::Paid
        );
    }

    #[test]
    fn closed_invoices_refuse_payments() {
        let paid = invoice(10, InvoiceStatus::Paid);
        assert!(matches!(
            check_payment(&paid, 10, 1, PaymentMethod::Cash),
            Err(BillingError::InvoiceAlreadyPaid)
        ));
        let cancelled = invoice(10, InvoiceStatus::Cancelled);
        assert!(matches!(
            check_payment(&cancelled, 0, 1, PaymentMethod::Cash),
            Err(BillingError::InvoiceCancelled)
        ));
    }

    #[test]
    fn negative_amounts_need_adjustment_method() {
        let inv = invoice(100, InvoiceStatus::Pending);
        assert!(matches!(
            check_payment(&inv, 50, -20, PaymentMethod::Cash),
            Err(BillingError::InvalidInput(_))
        ));
        assert_eq!(
            check_payment(&inv, 50, -20, PaymentMethod::Adjustment).unwrap(),
            Settlement::Partial { paid_amount: 30 }
        );
        assert!(matches!(
            check_payment(&inv, 50, -60, PaymentMethod::Adjustment),
            Err(BillingError::InvalidInput(_))
        ));
    }

    #[test]
    fn totals_apply_discount_before_tax() {
        let items = vec![
            NewInvoiceItem { description: "Internet 20Mbps".into(), quantity: 1, unit_price: 150_000 },
            NewInvoiceItem { description: "Router rental".into(), quantity: 2, unit_price: 25_000 },
        ];
        let discount = ServiceDiscount { enabled: true, kind: DiscountKind::Percent, value: 10 };

        let totals = compute_totals(&items, Some(&discount), 5_000, 11.0);
        assert_eq!(totals.subtotal, 200_000);
        assert_eq!(totals.discount_amount, 25_000);
        assert_eq!(totals.tax_amount, 19_250);
        assert_eq!(totals.total_amount, 194_250);
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let items = vec![NewInvoiceItem { description: "Lite".into(), quantity: 1, unit_price: 50_000 }];
        let totals = compute_totals(&items, None, 80_000, 0.0);
        assert_eq!(totals.discount_amount, 50_000);
        assert_eq!(totals.total_amount, 0);
    }

    #[test]
    fn fully_discounted_invoice_is_settled_at_creation() {
        let items = vec![NewInvoiceItem { description: "Lite".into(), quantity: 1, unit_price: 50_000 }];
        let totals = compute_totals(&items, None, 80_000, 11.0);
        assert_eq!(totals.total_amount, 0);

        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let new = NewInvoice {
            tenant_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            period_start: day,
            period_end: day,
            due_date: day,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
            currency: DEFAULT_CURRENCY.into(),
            notes: None,
            items,
        };
        assert_eq!(new.opening_status(), InvoiceStatus::Paid);

        // A pending zero-total invoice could never be paid off.
        assert!(matches!(
            check_payment(&invoice(0, InvoiceStatus::Pending), 0, 0, PaymentMethod::Cash),
            Err(BillingError::InvalidInput(_))
        ));
    }

    #[test]
    fn due_day_is_clamped_to_month_length() {
        assert_eq!(effective_due_day(31, 2027, 2), 28);
        assert_eq!(effective_due_day(31, 2028, 2), 29);
        assert_eq!(effective_due_day(31, 2027, 4), 30);
        assert_eq!(effective_due_day(15, 2027, 2), 15);
        assert_eq!(effective_due_day(0, 2027, 2), 1);
    }

    #[test]
    fn day_before_clamped_due_day_bills_following_month() {
        let window = invoice_window_for(d(2027, 2, 27), 31).unwrap();
        assert_eq!(window.period_start, d(2027, 3, 1));
        assert_eq!(window.period_end, d(2027, 3, 31));
        assert_eq!(window.due_date, d(2027, 2, 28));

        assert!(invoice_window_for(d(2027, 2, 26), 31).is_none());
        assert!(invoice_window_for(d(2027, 2, 28), 31).is_none());
    }

    #[test]
    fn leap_february_waits_for_the_29th() {
        assert!(invoice_window_for(d(2028, 2, 27), 31).is_none());
        let window = invoice_window_for(d(2028, 2, 28), 31).unwrap();
        assert_eq!(window.due_date, d(2028, 2, 29));
        assert_eq!(window.period_end, d(2028, 3, 31));
    }

    #[test]
    fn december_rolls_into_next_year() {
        let window = invoice_window_for(d(2026, 12, 4), 5).unwrap();
        assert_eq!(window.period_start, d(2027, 1, 1));
        assert_eq!(window.period_end, d(2027, 1, 31));
    }

    #[test]
    fn invoice_month_follows_tenant_local_date() {
        let late_evening_utc = Utc.with_ymd_and_hms(2026, 3, 31, 20, 0, 0).unwrap();
        assert_eq!(month_key(local_today(late_evening_utc, wib())), "202604");
        assert_eq!(month_key(local_today(late_evening_utc, FixedOffset::east_opt(0).unwrap())), "202603");
    }

    #[test]
    fn matrix_cells_distinguish_paid_timing() {
        let due = d(2026, 3, 10);
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let on_time = Utc.with_ymd_and_hms(2026, 3, 10, 16, 0, 0).unwrap(); // 23:00 WIB
        let late = Utc.with_ymd_and_hms(2026, 3, 10, 17, 30, 0).unwrap(); // 00:30 WIB next day

        assert_eq!(matrix_cell(InvoiceStatus::Paid, due, Some(on_time), now, wib()), MatrixStatus::PaidOnTime);
        assert_eq!(matrix_cell(InvoiceStatus::Paid, due, Some(late), now, wib()), MatrixStatus::PaidLate);
        assert_eq!(matrix_cell(InvoiceStatus::Pending, due, None, now, wib()), MatrixStatus::Overdue);
        assert_eq!(
            matrix_cell(InvoiceStatus::Draft, due, None, Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap(), wib()),
            MatrixStatus::Pending
        );
        assert_eq!(matrix_cell(InvoiceStatus::Cancelled, due, None, now, wib()), MatrixStatus::Cancelled);
    }

    #[test]
    fn matrix_filter_aliases() {
        assert_eq!(
            matrix_status_filter("paid").unwrap(),
            vec![MatrixStatus::PaidOnTime, MatrixStatus::PaidLate]
        );
        assert_eq!(matrix_status_filter("draft").unwrap(), vec![MatrixStatus::Pending]);
        assert_eq!(matrix_status_filter("overdue").unwrap(), vec![MatrixStatus::Overdue]);
        assert!(matches!(matrix_status_filter("unpaid"), Err(BillingError::InvalidInput(_))));
    }

    #[test]
    fn invalid_invoice_input_is_rejected() {
        let base = CreateInvoiceInput {
            client_id: Uuid::new_v4(),
            period_start: d(2026, 3, 1),
            period_end: d(2026, 3, 31),
            due_date: d(2026, 3, 10),
            items: vec![],
            tax_percent: None,
            discount_amount: None,
            notes: None,
        };
        assert!(validate_invoice_input(&base).is_err());

        let reversed = CreateInvoiceInput {
            items: vec![NewInvoiceItem { description: "x".into(), quantity: 1, unit_price: 1 }],
            period_end: d(2026, 2, 1),
            ..base.clone()
        };
        assert!(validate_invoice_input(&reversed).is_err());
    }
}
