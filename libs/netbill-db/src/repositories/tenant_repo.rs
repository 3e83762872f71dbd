use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::tenant::{Tenant, TenantSettings, TenantStatus};

#[derive(Debug, Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tenant by ID")
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE slug = $1")
            .bind(slug.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tenant by slug")
    }

    pub async fn list_active(&self) -> Result<Vec<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE status = 'active' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list active tenants")
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants ORDER BY created_at DESC LIMIT $1 OFFSET $2")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list tenants")
    }

    pub async fn slug_exists(&self, slug: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE slug = $1)")
            .bind(slug.to_ascii_lowercase())
            .fetch_one(&self.pool)
            .await
            .context("Failed to check tenant slug")
    }

    pub async fn create_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        slug: &str,
        name: &str,
        plan_id: Option<Uuid>,
        trial_ends_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, slug, name, status, billing_status, plan_id, trial_ends_at, settings)
            VALUES ($1, $2, $3, 'active', 'trial', $4, $5, '{}'::jsonb)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(slug.to_ascii_lowercase())
        .bind(name)
        .bind(plan_id)
        .bind(trial_ends_at)
        .fetch_one(&mut **tx)
        .await
        .context("Failed to create tenant")
    }

    pub async fn update_status(&self, id: Uuid, status: TenantStatus) -> Result<()> {
        sqlx::query("UPDATE tenants SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update tenant status")?;
        Ok(())
    }

    pub async fn update_settings(&self, id: Uuid, settings: &TenantSettings) -> Result<()> {
        sqlx::query("UPDATE tenants SET settings = $1 WHERE id = $2")
            .bind(sqlx::types::Json(settings))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update tenant settings")?;
        Ok(())
    }
}
