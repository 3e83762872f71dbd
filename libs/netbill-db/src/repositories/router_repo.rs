use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::router::{NetworkProfile, Router, RouterStatus};

#[derive(Debug, Clone)]
pub struct RouterRepository {
    pool: PgPool,
}

/// Insert payload; secrets arrive already encrypted.
#[derive(Debug, Clone)]
pub struct NewRouter {
    pub tenant_id: Uuid,
    pub name: String,
    pub host: String,
    pub api_port: i32,
    pub api_use_tls: bool,
    pub username: String,
    pub password_enc: String,
    pub connectivity_mode: String,
    pub nas_ip: Option<String>,
    pub radius_enabled: bool,
    pub radius_secret_enc: Option<String>,
}

impl RouterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Router>> {
        sqlx::query_as::<_, Router>("SELECT * FROM routers WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch router")
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<Router>> {
        sqlx::query_as::<_, Router>("SELECT * FROM routers WHERE tenant_id = $1 ORDER BY name")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list routers")
    }

    pub async fn count(&self, tenant_id: Uuid) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM routers WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count routers")
    }

    /// RADIUS callers identify themselves only by NAS address.
    pub async fn find_radius_by_nas_ip(&self, nas_ip: &str) -> Result<Option<Router>> {
        sqlx::query_as::<_, Router>(
            "SELECT * FROM routers WHERE nas_ip = $1 AND radius_enabled = TRUE ORDER BY created_at LIMIT 1",
        )
        .bind(nas_ip)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve router by NAS IP")
    }

    pub async fn create(&self, router: &NewRouter) -> Result<Router> {
        sqlx::query_as::<_, Router>(
            r#"
            INSERT INTO routers (id, tenant_id, name, type, host, api_port, api_use_tls, username, password_enc,
                                 connectivity_mode, nas_ip, radius_enabled, radius_secret_enc, status)
            VALUES ($1, $2, $3, 'mikrotik', $4, $5, $6, $7, $8, $9, $10, $11, $12, 'unknown')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(router.tenant_id)
        .bind(&router.name)
        .bind(&router.host)
        .bind(router.api_port)
        .bind(router.api_use_tls)
        .bind(&router.username)
        .bind(&router.password_enc)
        .bind(&router.connectivity_mode)
        .bind(&router.nas_ip)
        .bind(router.radius_enabled)
        .bind(&router.radius_secret_enc)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create router")
    }

    /// `last_seen` only moves forward on a successful contact.
    pub async fn record_contact(&self, tenant_id: Uuid, id: Uuid, status: RouterStatus, at: DateTime<Utc>) -> Result<()> {
        let query = if status == RouterStatus::Online {
            sqlx::query("UPDATE routers SET status = $1, last_seen = $2 WHERE tenant_id = $3 AND id = $4")
                .bind(status.as_str())
                .bind(at)
                .bind(tenant_id)
                .bind(id)
        } else {
            sqlx::query("UPDATE routers SET status = $1 WHERE tenant_id = $2 AND id = $3")
                .bind(status.as_str())
                .bind(tenant_id)
                .bind(id)
        };
        query
            .execute(&self.pool)
            .await
            .context("Failed to update router status")?;
        Ok(())
    }

    pub async fn get_profile(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<NetworkProfile>> {
        sqlx::query_as::<_, NetworkProfile>("SELECT * FROM network_profiles WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch network profile")
    }

    pub async fn list_profiles(&self, tenant_id: Uuid) -> Result<Vec<NetworkProfile>> {
        sqlx::query_as::<_, NetworkProfile>(
            "SELECT * FROM network_profiles WHERE tenant_id = $1 AND is_active = TRUE ORDER BY name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list network profiles")
    }

    pub async fn create_profile(
        &self,
        tenant_id: Uuid,
        name: &str,
        download_speed: &str,
        upload_speed: &str,
        local_address: Option<&str>,
        remote_address: Option<&str>,
    ) -> Result<NetworkProfile> {
        sqlx::query_as::<_, NetworkProfile>(
            r#"
            INSERT INTO network_profiles (id, tenant_id, name, download_speed, upload_speed, local_address, remote_address, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .bind(download_speed)
        .bind(upload_speed)
        .bind(local_address)
        .bind(remote_address)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create network profile")
    }
}
