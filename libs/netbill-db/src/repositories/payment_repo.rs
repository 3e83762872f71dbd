use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::invoice::{NewPayment, Payment};

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn sum_for_invoice_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payments WHERE tenant_id = $1 AND invoice_id = $2",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .context("Failed to sum invoice payments")
    }

    pub async fn insert_tx(&self, tx: &mut Transaction<'_, Postgres>, payment: &NewPayment) -> Result<Payment> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (id, tenant_id, invoice_id, client_id, amount, method, reference, collector_id,
                                  notes, received_at, created_by_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.tenant_id)
        .bind(payment.invoice_id)
        .bind(payment.client_id)
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .bind(&payment.reference)
        .bind(payment.collector_id)
        .bind(&payment.notes)
        .bind(payment.received_at)
        .bind(payment.created_by_user_id)
        .fetch_one(&mut **tx)
        .await
        .context("Failed to insert payment")
    }

    pub async fn count_for_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE tenant_id = $1 AND invoice_id = $2")
            .bind(tenant_id)
            .bind(invoice_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count invoice payments")
    }

    pub async fn list_for_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE tenant_id = $1 AND invoice_id = $2 ORDER BY received_at, created_at",
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list invoice payments")
    }

    pub async fn sum_received_between(&self, tenant_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payments WHERE tenant_id = $1 AND received_at >= $2 AND received_at < $3",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum received payments")
    }
}
