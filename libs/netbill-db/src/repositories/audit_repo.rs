use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::audit::NewAuditLog;

#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, entry: &NewAuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (request_id, tenant_id, user_id, method, path, status, duration_ms, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&entry.request_id)
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(entry.status)
        .bind(entry.duration_ms)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .execute(&self.pool)
        .await
        .context("Failed to write audit log")?;
        Ok(())
    }
}
