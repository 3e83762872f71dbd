use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::invoice::{
    Invoice, InvoiceItem, InvoiceStatus, InvoiceStatusTotals, NewInvoice, format_invoice_number,
};

#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: PgPool,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub period_from: Option<NaiveDate>,
    pub period_to: Option<NaiveDate>,
}

/// Latest invoice per client and month for a year, joined to its client.
#[derive(Debug, Clone, FromRow)]
pub struct MatrixInvoiceRow {
    pub client_id: Uuid,
    pub month: i32,
    pub invoice_id: Uuid,
    pub status: String,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub total_amount: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct MatrixClientRow {
    pub id: Uuid,
    pub name: String,
    pub client_code: String,
    pub group_id: Option<Uuid>,
}

impl InvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Next `INV-YYYYMM-NNNN` for the tenant and month.
    ///
    /// Takes a transaction-scoped advisory lock on (tenant, month) so concurrent
    /// creators serialize on the count; the unique index stays the last guard.
    pub async fn next_number_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        month_key: &str,
    ) -> Result<String> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("invoice_number:{}:{}", tenant_id, month_key))
            .execute(&mut **tx)
            .await
            .context("Failed to lock invoice sequence")?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoices WHERE tenant_id = $1 AND invoice_number LIKE $2",
        )
        .bind(tenant_id)
        .bind(format!("INV-{}-%", month_key))
        .fetch_one(&mut **tx)
        .await
        .context("Failed to count invoices for month")?;

        Ok(format_invoice_number(month_key, count + 1))
    }

    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        invoice: &NewInvoice,
        invoice_number: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<Invoice> {
        let status = invoice.opening_status();
        let paid_at = (status == InvoiceStatus::Paid).then_some(issued_at);
        let created = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (id, tenant_id, client_id, invoice_number, period_start, period_end, due_date,
                                  subtotal, tax_amount, discount_amount, total_amount, paid_amount, currency,
                                  status, paid_at, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice.tenant_id)
        .bind(invoice.client_id)
        .bind(invoice_number)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.discount_amount)
        .bind(invoice.total_amount)
        .bind(&invoice.currency)
        .bind(status.as_str())
        .bind(paid_at)
        .bind(&invoice.notes)
        .fetch_one(&mut **tx)
        .await
        .context("Failed to insert invoice")?;

        for item in &invoice.items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (id, invoice_id, description, quantity, unit_price, amount)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(created.id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount())
            .execute(&mut **tx)
            .await
            .context("Failed to insert invoice item")?;
        }

        Ok(created)
    }

    pub async fn exists_for_period(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM invoices
                WHERE tenant_id = $1 AND client_id = $2 AND period_start = $3 AND period_end = $4
                  AND deleted_at IS NULL
            )
            "#,
        )
        .bind(tenant_id)
        .bind(client_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check invoice period")
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Invoice>> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch invoice")
    }

    pub async fn get_for_update_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Invoice>> {
        sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to lock invoice")
    }

    pub async fn items(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<InvoiceItem>> {
        sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT ii.* FROM invoice_items ii
            JOIN invoices i ON i.id = ii.invoice_id
            WHERE i.tenant_id = $1 AND ii.invoice_id = $2
            ORDER BY ii.description
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch invoice items")
    }

    pub async fn list(&self, tenant_id: Uuid, filter: &InvoiceFilter, limit: i64, offset: i64) -> Result<Vec<Invoice>> {
        sqlx::query_as::<_, Invoice>(
            r#"
            SELECT i.* FROM invoices i
            JOIN clients c ON c.id = i.client_id AND c.deleted_at IS NULL
            WHERE i.tenant_id = $1 AND i.deleted_at IS NULL
              AND ($2::uuid IS NULL OR i.client_id = $2)
              AND ($3::text IS NULL OR i.status = $3)
              AND ($4::date IS NULL OR i.period_start >= $4)
              AND ($5::date IS NULL OR i.period_start <= $5)
            ORDER BY i.created_at DESC, i.id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(tenant_id)
        .bind(filter.client_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.period_from)
        .bind(filter.period_to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list invoices")
    }

    /// Lazily flips `pending` invoices past their due date to `overdue`.
    pub async fn promote_overdue(&self, tenant_id: Uuid, today: NaiveDate) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE invoices SET status = 'overdue' WHERE tenant_id = $1 AND status = 'pending' AND due_date < $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id)
        .bind(today)
        .execute(&self.pool)
        .await
        .context("Failed to promote overdue invoices")?
        .rows_affected();
        Ok(affected)
    }

    pub async fn mark_paid_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        paid_amount: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<Invoice> {
        sqlx::query_as::<_, Invoice>(
            "UPDATE invoices SET status = 'paid', paid_amount = $2, paid_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(paid_amount)
        .bind(paid_at)
        .fetch_one(&mut **tx)
        .await
        .context("Failed to mark invoice paid")
    }

    pub async fn set_paid_amount_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        paid_amount: i64,
    ) -> Result<Invoice> {
        sqlx::query_as::<_, Invoice>("UPDATE invoices SET paid_amount = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(paid_amount)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to update invoice paid amount")
    }

    pub async fn set_status_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Invoice> {
        sqlx::query_as::<_, Invoice>("UPDATE invoices SET status = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(status.as_str())
            .fetch_one(&mut **tx)
            .await
            .context("Failed to update invoice status")
    }

    /// True if the client still holds another open invoice due before `today`.
    pub async fn has_other_overdue(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        today: NaiveDate,
        exclude_invoice: Uuid,
    ) -> Result<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM invoices
                WHERE tenant_id = $1 AND client_id = $2 AND id <> $4 AND deleted_at IS NULL
                  AND status IN ('pending', 'overdue') AND due_date < $3
            )
            "#,
        )
        .bind(tenant_id)
        .bind(client_id)
        .bind(today)
        .bind(exclude_invoice)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check remaining overdue invoices")
    }

    pub async fn matrix_clients(
        &self,
        tenant_id: Uuid,
        client_name: Option<&str>,
        group_id: Option<Uuid>,
    ) -> Result<Vec<MatrixClientRow>> {
        sqlx::query_as::<_, MatrixClientRow>(
            r#"
            SELECT id, name, client_code, group_id FROM clients
            WHERE tenant_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%')
              AND ($3::uuid IS NULL OR group_id = $3)
            ORDER BY name, id
            "#,
        )
        .bind(tenant_id)
        .bind(client_name)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list matrix clients")
    }

    pub async fn matrix_invoices(&self, tenant_id: Uuid, year_start: NaiveDate, year_end: NaiveDate) -> Result<Vec<MatrixInvoiceRow>> {
        sqlx::query_as::<_, MatrixInvoiceRow>(
            r#"
            SELECT DISTINCT ON (i.client_id, date_trunc('month', i.period_start))
                   i.client_id, EXTRACT(MONTH FROM i.period_start)::INT AS month, i.id AS invoice_id,
                   i.status, i.due_date, i.paid_at, i.total_amount
            FROM invoices i
            JOIN clients c ON c.id = i.client_id AND c.deleted_at IS NULL
            WHERE i.tenant_id = $1 AND i.deleted_at IS NULL
              AND i.period_start >= $2 AND i.period_start < $3
            ORDER BY i.client_id, date_trunc('month', i.period_start), i.created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(year_start)
        .bind(year_end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load matrix invoices")
    }

    pub async fn status_totals(&self, tenant_id: Uuid, period_from: NaiveDate, period_to: NaiveDate) -> Result<Vec<InvoiceStatusTotals>> {
        sqlx::query_as::<_, InvoiceStatusTotals>(
            r#"
            SELECT i.status, COUNT(*) AS count,
                   COALESCE(SUM(i.total_amount), 0)::BIGINT AS total_amount,
                   COALESCE(SUM(i.paid_amount), 0)::BIGINT AS paid_amount
            FROM invoices i
            JOIN clients c ON c.id = i.client_id AND c.deleted_at IS NULL
            WHERE i.tenant_id = $1 AND i.deleted_at IS NULL
              AND i.period_start >= $2 AND i.period_start < $3
            GROUP BY i.status
            ORDER BY i.status
            "#,
        )
        .bind(tenant_id)
        .bind(period_from)
        .bind(period_to)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate invoices")
    }
}
