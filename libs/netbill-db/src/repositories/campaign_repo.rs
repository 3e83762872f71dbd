use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::campaign::{Campaign, Recipient, RecipientStatus, RecipientTarget};

#[derive(Debug, Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Campaign row plus one pending recipient per target, in a single transaction.
    pub async fn create_with_recipients(
        &self,
        tenant_id: Uuid,
        group_id: Uuid,
        name: &str,
        message: &str,
        targets: &[RecipientTarget],
    ) -> Result<(Campaign, Vec<Recipient>)> {
        let mut tx = self.pool.begin().await?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (id, tenant_id, group_id, name, message, status, total, sent, failed)
            VALUES ($1, $2, $3, $4, $5, 'queued', $6, 0, 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(group_id)
        .bind(name)
        .bind(message)
        .bind(targets.len() as i32)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert campaign")?;

        let ids: Vec<Uuid> = targets.iter().map(|_| Uuid::new_v4()).collect();
        let client_ids: Vec<Uuid> = targets.iter().map(|t| t.client_id).collect();
        let phones: Vec<String> = targets.iter().map(|t| t.phone.clone()).collect();

        let recipients = sqlx::query_as::<_, Recipient>(
            r#"
            INSERT INTO campaign_recipients (id, campaign_id, client_id, phone, status)
            SELECT r.id, $1, r.client_id, r.phone, 'pending'
            FROM UNNEST($2::uuid[], $3::uuid[], $4::text[]) AS r(id, client_id, phone)
            RETURNING *
            "#,
        )
        .bind(campaign.id)
        .bind(&ids)
        .bind(&client_ids)
        .bind(&phones)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to insert campaign recipients")?;

        tx.commit().await?;
        Ok((campaign, recipients))
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch campaign")
    }

    pub async fn list(&self, tenant_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list campaigns")
    }

    pub async fn recipients(
        &self,
        tenant_id: Uuid,
        campaign_id: Uuid,
        status: Option<RecipientStatus>,
    ) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT r.* FROM campaign_recipients r
            JOIN campaigns c ON c.id = r.campaign_id
            WHERE c.tenant_id = $1 AND r.campaign_id = $2 AND ($3::text IS NULL OR r.status = $3)
            ORDER BY r.id
            "#,
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list campaign recipients")
    }

    /// Returns `None` when the recipient was not pending (already settled or unknown).
    pub async fn mark_recipient_sent(
        &self,
        tenant_id: Uuid,
        recipient_id: Uuid,
        message_id: Option<&str>,
    ) -> Result<Option<Campaign>> {
        let mut tx = self.pool.begin().await?;

        let campaign_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE campaign_recipients r SET status = 'sent', message_id = $3, sent_at = NOW(), error = NULL
            FROM campaigns c
            WHERE r.id = $2 AND r.campaign_id = c.id AND c.tenant_id = $1 AND r.status = 'pending'
            RETURNING r.campaign_id
            "#,
        )
        .bind(tenant_id)
        .bind(recipient_id)
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to mark recipient sent")?;

        let Some(campaign_id) = campaign_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE campaigns SET sent = sent + 1,
                status = CASE WHEN status IN ('queued', 'running') THEN 'running' ELSE status END
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;

        let campaign = Self::promote_completed(&mut tx, campaign_id).await?;
        tx.commit().await?;
        Ok(Some(campaign))
    }

    pub async fn mark_recipient_failed(
        &self,
        tenant_id: Uuid,
        recipient_id: Uuid,
        error: &str,
    ) -> Result<Option<Campaign>> {
        let mut tx = self.pool.begin().await?;

        let campaign_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE campaign_recipients r SET status = 'failed', error = $3
            FROM campaigns c
            WHERE r.id = $2 AND r.campaign_id = c.id AND c.tenant_id = $1 AND r.status = 'pending'
            RETURNING r.campaign_id
            "#,
        )
        .bind(tenant_id)
        .bind(recipient_id)
        .bind(error)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to mark recipient failed")?;

        let Some(campaign_id) = campaign_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE campaigns SET failed = failed + 1,
                status = CASE WHEN status IN ('queued', 'running') THEN 'running' ELSE status END
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;

        let campaign = Self::promote_completed(&mut tx, campaign_id).await?;
        tx.commit().await?;
        Ok(Some(campaign))
    }

    async fn promote_completed(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, campaign_id: Uuid) -> Result<Campaign> {
        sqlx::query(
            r#"
            UPDATE campaigns SET status = 'completed'
            WHERE id = $1 AND sent + failed >= total AND status IN ('queued', 'running')
            "#,
        )
        .bind(campaign_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to reload campaign")
    }

    /// Resets failed recipients to pending and hands them back for re-enqueue.
    /// `None` when the campaign does not belong to the tenant.
    pub async fn retry_failed(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<(Campaign, Vec<Recipient>)>> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM campaigns WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(campaign_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;
        if owned.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let reset = sqlx::query_as::<_, Recipient>(
            r#"
            UPDATE campaign_recipients SET status = 'pending', error = NULL, message_id = NULL, sent_at = NULL
            WHERE campaign_id = $1 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to reset failed recipients")?;

        if !reset.is_empty() {
            sqlx::query(
                "UPDATE campaigns SET failed = GREATEST(failed - $2, 0), status = 'running' WHERE id = $1",
            )
            .bind(campaign_id)
            .bind(reset.len() as i32)
            .execute(&mut *tx)
            .await?;
        }

        let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((campaign, reset)))
    }

    pub async fn cancel(&self, tenant_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET status = 'cancelled'
            WHERE tenant_id = $1 AND id = $2 AND status IN ('queued', 'running')
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to cancel campaign")
    }
}
