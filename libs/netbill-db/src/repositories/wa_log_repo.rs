use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::campaign::{NewWaMessageLog, WaMessageLog};

#[derive(Debug, Clone)]
pub struct WaLogRepository {
    pool: PgPool,
}

impl WaLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, log: &NewWaMessageLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wa_message_logs (id, tenant_id, campaign_id, recipient_id, phone, message, status, message_id, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(log.tenant_id)
        .bind(log.campaign_id)
        .bind(log.recipient_id)
        .bind(&log.phone)
        .bind(&log.message)
        .bind(&log.status)
        .bind(&log.message_id)
        .bind(&log.error)
        .execute(&self.pool)
        .await
        .context("Failed to insert WA message log")?;
        Ok(())
    }

    /// Page ordered by `(created_at DESC, id DESC)`, strictly after `cursor` when given.
    pub async fn list_page(
        &self,
        tenant_id: Uuid,
        cursor: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<WaMessageLog>> {
        let (after_ts, after_id) = match cursor {
            Some((ts, id)) => (Some(ts), Some(id)),
            None => (None, None),
        };
        sqlx::query_as::<_, WaMessageLog>(
            r#"
            SELECT * FROM wa_message_logs
            WHERE tenant_id = $1
              AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(tenant_id)
        .bind(after_ts)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list WA message logs")
    }
}
