use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::radius::{RadiusAuthLog, RadiusSession};

#[derive(Debug, Clone)]
pub struct RadiusRepository {
    pool: PgPool,
}

/// One accounting packet as reported by the NAS.
#[derive(Debug, Clone)]
pub struct AccountingRecord {
    pub tenant_id: Uuid,
    pub router_id: Uuid,
    pub session_id: String,
    pub username: String,
    pub framed_ip: Option<String>,
    pub input_octets: i64,
    pub output_octets: i64,
    pub stop: bool,
    pub terminate_cause: Option<String>,
}

impl RadiusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_auth_log(
        &self,
        tenant_id: Uuid,
        router_id: Uuid,
        username: &str,
        accepted: bool,
        reason: Option<&str>,
        calling_station_id: Option<&str>,
    ) -> Result<RadiusAuthLog> {
        sqlx::query_as::<_, RadiusAuthLog>(
            r#"
            INSERT INTO radius_auth_logs (tenant_id, router_id, username, accepted, reason, calling_station_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(router_id)
        .bind(username)
        .bind(accepted)
        .bind(reason)
        .bind(calling_station_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record RADIUS auth attempt")
    }

    pub async fn upsert_session(&self, record: &AccountingRecord) -> Result<RadiusSession> {
        sqlx::query_as::<_, RadiusSession>(
            r#"
            INSERT INTO radius_sessions (id, tenant_id, router_id, session_id, username, framed_ip,
                                         input_octets, output_octets, stopped_at, terminate_cause)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, CASE WHEN $9 THEN NOW() END, $10)
            ON CONFLICT (tenant_id, router_id, session_id) DO UPDATE SET
                framed_ip = COALESCE(EXCLUDED.framed_ip, radius_sessions.framed_ip),
                input_octets = GREATEST(EXCLUDED.input_octets, radius_sessions.input_octets),
                output_octets = GREATEST(EXCLUDED.output_octets, radius_sessions.output_octets),
                updated_at = NOW(),
                stopped_at = COALESCE(radius_sessions.stopped_at, EXCLUDED.stopped_at),
                terminate_cause = COALESCE(EXCLUDED.terminate_cause, radius_sessions.terminate_cause)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.tenant_id)
        .bind(record.router_id)
        .bind(&record.session_id)
        .bind(&record.username)
        .bind(&record.framed_ip)
        .bind(record.input_octets)
        .bind(record.output_octets)
        .bind(record.stop)
        .bind(&record.terminate_cause)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert RADIUS session")
    }

    pub async fn list_open_sessions(&self, tenant_id: Uuid) -> Result<Vec<RadiusSession>> {
        sqlx::query_as::<_, RadiusSession>(
            "SELECT * FROM radius_sessions WHERE tenant_id = $1 AND stopped_at IS NULL ORDER BY started_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list RADIUS sessions")
    }
}
