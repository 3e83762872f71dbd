use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::router::{NewPppoeSecret, PppoeSecret};

/// Local shadow of router-side PPPoE secrets.
#[derive(Debug, Clone)]
pub struct PppoeRepository {
    pool: PgPool,
}

/// Mutable fields for an update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct PppoeSecretChanges {
    pub profile_id: Option<Uuid>,
    pub password_enc: Option<String>,
    pub service: Option<String>,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
}

impl PppoeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<PppoeSecret>> {
        sqlx::query_as::<_, PppoeSecret>("SELECT * FROM pppoe_secrets WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch PPPoE secret")
    }

    pub async fn get_by_username(&self, tenant_id: Uuid, username: &str) -> Result<Option<PppoeSecret>> {
        sqlx::query_as::<_, PppoeSecret>("SELECT * FROM pppoe_secrets WHERE tenant_id = $1 AND username = $2")
            .bind(tenant_id)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch PPPoE secret by username")
    }

    pub async fn get_by_client(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Option<PppoeSecret>> {
        sqlx::query_as::<_, PppoeSecret>(
            "SELECT * FROM pppoe_secrets WHERE tenant_id = $1 AND client_id = $2 ORDER BY created_at LIMIT 1",
        )
        .bind(tenant_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch PPPoE secret by client")
    }

    pub async fn list(&self, tenant_id: Uuid, router_id: Option<Uuid>) -> Result<Vec<PppoeSecret>> {
        sqlx::query_as::<_, PppoeSecret>(
            "SELECT * FROM pppoe_secrets WHERE tenant_id = $1 AND ($2::uuid IS NULL OR router_id = $2) ORDER BY username",
        )
        .bind(tenant_id)
        .bind(router_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list PPPoE secrets")
    }

    pub async fn username_taken(&self, tenant_id: Uuid, username: &str, exclude_id: Option<Uuid>) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pppoe_secrets WHERE tenant_id = $1 AND username = $2 AND ($3::uuid IS NULL OR id <> $3))",
        )
        .bind(tenant_id)
        .bind(username)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check PPPoE username")
    }

    pub async fn create(&self, secret: &NewPppoeSecret) -> Result<PppoeSecret> {
        sqlx::query_as::<_, PppoeSecret>(
            r#"
            INSERT INTO pppoe_secrets (id, tenant_id, client_id, router_id, profile_id, username, password_enc,
                                       service, local_address, remote_address, comment, is_disabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(secret.tenant_id)
        .bind(secret.client_id)
        .bind(secret.router_id)
        .bind(secret.profile_id)
        .bind(&secret.username)
        .bind(&secret.password_enc)
        .bind(&secret.service)
        .bind(&secret.local_address)
        .bind(&secret.remote_address)
        .bind(&secret.comment)
        .bind(secret.is_disabled)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create PPPoE secret")
    }

    pub async fn update(&self, tenant_id: Uuid, id: Uuid, changes: &PppoeSecretChanges) -> Result<Option<PppoeSecret>> {
        sqlx::query_as::<_, PppoeSecret>(
            r#"
            UPDATE pppoe_secrets SET
                profile_id = COALESCE($3, profile_id),
                password_enc = COALESCE($4, password_enc),
                service = COALESCE($5, service),
                local_address = COALESCE($6, local_address),
                remote_address = COALESCE($7, remote_address),
                comment = COALESCE($8, comment),
                updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(changes.profile_id)
        .bind(&changes.password_enc)
        .bind(&changes.service)
        .bind(&changes.local_address)
        .bind(&changes.remote_address)
        .bind(&changes.comment)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update PPPoE secret")
    }

    pub async fn set_disabled(&self, tenant_id: Uuid, id: Uuid, is_disabled: bool) -> Result<Option<PppoeSecret>> {
        sqlx::query_as::<_, PppoeSecret>(
            "UPDATE pppoe_secrets SET is_disabled = $3, updated_at = NOW() WHERE tenant_id = $1 AND id = $2 RETURNING *",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(is_disabled)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to toggle PPPoE secret")
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<PppoeSecret>> {
        sqlx::query_as::<_, PppoeSecret>("DELETE FROM pppoe_secrets WHERE tenant_id = $1 AND id = $2 RETURNING *")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to delete PPPoE secret")
    }

    pub async fn touch_last_connected(&self, tenant_id: Uuid, username: &str) -> Result<()> {
        sqlx::query("UPDATE pppoe_secrets SET last_connected_at = NOW() WHERE tenant_id = $1 AND username = $2")
            .bind(tenant_id)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
