use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::plan::{ActiveAddon, FeatureToggle, Plan};

/// Reads everything the feature/limit resolver layers together.
#[derive(Debug, Clone)]
pub struct EntitlementRepository {
    pool: PgPool,
}

impl EntitlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_plan_for_tenant(&self, tenant_id: Uuid) -> Result<Option<Plan>> {
        sqlx::query_as::<_, Plan>(
            "SELECT p.* FROM plans p JOIN tenants t ON t.plan_id = p.id WHERE t.id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch tenant plan")
    }

    pub async fn get_plan_by_code(&self, code: &str) -> Result<Option<Plan>> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE code = $1 AND is_active = TRUE")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch plan by code")
    }

    pub async fn get_global_toggle(&self, code: &str) -> Result<Option<FeatureToggle>> {
        sqlx::query_as::<_, FeatureToggle>(
            "SELECT * FROM feature_toggles WHERE code = $1 AND tenant_id IS NULL",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch global feature toggle")
    }

    pub async fn get_tenant_toggle(&self, tenant_id: Uuid, code: &str) -> Result<Option<FeatureToggle>> {
        sqlx::query_as::<_, FeatureToggle>(
            "SELECT * FROM feature_toggles WHERE code = $1 AND tenant_id = $2",
        )
        .bind(code)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch tenant feature toggle")
    }

    /// Addons not yet expired at `now`.
    pub async fn list_active_addons(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ActiveAddon>> {
        sqlx::query_as::<_, ActiveAddon>(
            r#"
            SELECT ta.id AS tenant_addon_id, ta.tenant_id, ta.addon_id, a.code, a.type, a.value,
                   ta.quantity, ta.expires_at
            FROM tenant_addons ta
            JOIN addons a ON a.id = ta.addon_id
            WHERE ta.tenant_id = $1 AND (ta.expires_at IS NULL OR ta.expires_at > $2)
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tenant addons")
    }

    pub async fn upsert_toggle(&self, tenant_id: Option<Uuid>, code: &str, is_enabled: bool) -> Result<FeatureToggle> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM feature_toggles WHERE code = $1 AND tenant_id IS NOT DISTINCT FROM $2 FOR UPDATE",
        )
        .bind(code)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let toggle = match existing {
            Some(id) => {
                sqlx::query_as::<_, FeatureToggle>(
                    "UPDATE feature_toggles SET is_enabled = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
                )
                .bind(is_enabled)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, FeatureToggle>(
                    r#"
                    INSERT INTO feature_toggles (id, code, tenant_id, is_enabled, conditions, updated_at)
                    VALUES ($1, $2, $3, $4, '{}'::jsonb, NOW())
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(code)
                .bind(tenant_id)
                .bind(is_enabled)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(toggle)
    }

    pub async fn delete_toggle(&self, tenant_id: Option<Uuid>, code: &str) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM feature_toggles WHERE code = $1 AND tenant_id IS NOT DISTINCT FROM $2")
            .bind(code)
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete feature toggle")?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn attach_addon(
        &self,
        tenant_id: Uuid,
        addon_code: &str,
        quantity: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Uuid>> {
        let addon_id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM addons WHERE code = $1")
            .bind(addon_code)
            .fetch_optional(&self.pool)
            .await?;
        let Some(addon_id) = addon_id else {
            return Ok(None);
        };

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tenant_addons (id, tenant_id, addon_id, quantity, expires_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(addon_id)
        .bind(quantity)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("Failed to attach addon")?;
        Ok(Some(id))
    }
}
