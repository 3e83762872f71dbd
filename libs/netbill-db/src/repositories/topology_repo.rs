use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::topology::{NodeKind, NodeRef, OutageEvent, TopologyLink};

#[derive(Debug, Clone)]
pub struct TopologyRepository {
    pool: PgPool,
}

impl TopologyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn links(&self, tenant_id: Uuid) -> Result<Vec<TopologyLink>> {
        sqlx::query_as::<_, TopologyLink>("SELECT * FROM topology_links WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load topology links")
    }

    pub async fn create_link(&self, tenant_id: Uuid, from: NodeRef, to: NodeRef) -> Result<TopologyLink> {
        sqlx::query_as::<_, TopologyLink>(
            r#"
            INSERT INTO topology_links (id, tenant_id, from_kind, from_id, to_kind, to_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(from.kind.as_str())
        .bind(from.id)
        .bind(to.kind.as_str())
        .bind(to.id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create topology link")
    }

    pub async fn node_exists(&self, tenant_id: Uuid, node: NodeRef) -> Result<bool> {
        let query = match node.kind {
            NodeKind::Odc => "SELECT EXISTS(SELECT 1 FROM odcs WHERE tenant_id = $1 AND id = $2)",
            NodeKind::Odp => "SELECT EXISTS(SELECT 1 FROM odps WHERE tenant_id = $1 AND id = $2)",
            NodeKind::Client => {
                "SELECT EXISTS(SELECT 1 FROM clients WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL)"
            }
        };
        sqlx::query_scalar(query)
            .bind(tenant_id)
            .bind(node.id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check topology node")
    }

    pub async fn create_odc(&self, tenant_id: Uuid, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO odcs (id, tenant_id, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(tenant_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to create ODC")?;
        Ok(id)
    }

    pub async fn create_odp(&self, tenant_id: Uuid, odc_id: Option<Uuid>, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO odps (id, tenant_id, odc_id, name) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(tenant_id)
            .bind(odc_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to create ODP")?;
        Ok(id)
    }

    pub async fn create_outage(&self, tenant_id: Uuid, node: NodeRef, reason: &str, affected: &[NodeRef]) -> Result<OutageEvent> {
        sqlx::query_as::<_, OutageEvent>(
            r#"
            INSERT INTO outage_events (id, tenant_id, node_kind, node_id, reason, affected, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'open')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(node.kind.as_str())
        .bind(node.id)
        .bind(reason)
        .bind(sqlx::types::Json(affected))
        .fetch_one(&self.pool)
        .await
        .context("Failed to create outage event")
    }

    pub async fn resolve_outage(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<OutageEvent>> {
        sqlx::query_as::<_, OutageEvent>(
            r#"
            UPDATE outage_events SET status = 'resolved', resolved_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND status = 'open'
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve outage event")
    }

    pub async fn list_outages(&self, tenant_id: Uuid, only_open: bool) -> Result<Vec<OutageEvent>> {
        sqlx::query_as::<_, OutageEvent>(
            "SELECT * FROM outage_events WHERE tenant_id = $1 AND (NOT $2 OR status = 'open') ORDER BY started_at DESC",
        )
        .bind(tenant_id)
        .bind(only_open)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list outage events")
    }
}
