use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::collector::{CollectorVisit, VisitStatus};

#[derive(Debug, Clone)]
pub struct CollectorRepository {
    pool: PgPool,
}

impl CollectorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_visit(
        &self,
        tenant_id: Uuid,
        collector_id: Uuid,
        invoice_id: Uuid,
        client_id: Uuid,
        amount: i64,
        notes: Option<&str>,
    ) -> Result<CollectorVisit> {
        sqlx::query_as::<_, CollectorVisit>(
            r#"
            INSERT INTO collector_visits (id, tenant_id, collector_id, invoice_id, client_id, amount, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, 'collected', $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(collector_id)
        .bind(invoice_id)
        .bind(client_id)
        .bind(amount)
        .bind(notes)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record collector visit")
    }

    pub async fn list(&self, tenant_id: Uuid, status: Option<VisitStatus>, collector_id: Option<Uuid>) -> Result<Vec<CollectorVisit>> {
        sqlx::query_as::<_, CollectorVisit>(
            r#"
            SELECT * FROM collector_visits
            WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2) AND ($3::uuid IS NULL OR collector_id = $3)
            ORDER BY visited_at DESC, id DESC
            "#,
        )
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .bind(collector_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list collector visits")
    }

    /// Sum of visits still awaiting setoran for an invoice.
    pub async fn pending_amount_for_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM collector_visits WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'collected'",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum pending visits")
    }

    pub async fn get_for_update_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CollectorVisit>> {
        sqlx::query_as::<_, CollectorVisit>(
            "SELECT * FROM collector_visits WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to lock collector visit")
    }

    pub async fn mark_deposited_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        confirmed_by: Uuid,
        payment_id: Uuid,
    ) -> Result<CollectorVisit> {
        sqlx::query_as::<_, CollectorVisit>(
            r#"
            UPDATE collector_visits SET status = 'deposited', deposited_at = NOW(), deposit_confirmed_by = $2, payment_id = $3
            WHERE id = $1 AND status = 'collected'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(confirmed_by)
        .bind(payment_id)
        .fetch_one(&mut **tx)
        .await
        .context("Failed to mark visit deposited")
    }

    pub async fn mark_reconciled(&self, tenant_id: Uuid, id: Uuid, reconciled_by: Uuid) -> Result<Option<CollectorVisit>> {
        sqlx::query_as::<_, CollectorVisit>(
            r#"
            UPDATE collector_visits SET status = 'reconciled', reconciled_at = NOW(), reconciled_by = $3
            WHERE tenant_id = $1 AND id = $2 AND status = 'deposited'
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(reconciled_by)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to reconcile visit")
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<CollectorVisit>> {
        sqlx::query_as::<_, CollectorVisit>("SELECT * FROM collector_visits WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch collector visit")
    }
}
