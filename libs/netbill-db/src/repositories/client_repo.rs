use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::campaign::RecipientTarget;
use crate::models::client::{Client, ClientCategory, ClientStatus, NewClient, PaymentTempoTemplate, ServicePackage};

#[derive(Debug, Clone)]
pub struct ClientRepository {
    pool: PgPool,
}

#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    pub search: Option<String>,
    pub status: Option<ClientStatus>,
    pub group_id: Option<Uuid>,
}

impl ClientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Client>> {
        sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch client")
    }

    pub async fn list(&self, tenant_id: Uuid, filter: &ClientFilter, limit: i64, offset: i64) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            r#"
            SELECT * FROM clients
            WHERE tenant_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%' OR client_code ILIKE '%' || $2 || '%')
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid IS NULL OR group_id = $4)
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(tenant_id)
        .bind(filter.search.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.group_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list clients")
    }

    pub async fn count(&self, tenant_id: Uuid) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM clients WHERE tenant_id = $1 AND deleted_at IS NULL")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count clients")
    }

    /// Keyset page over active, non-deleted clients ordered by id.
    pub async fn list_active_page(&self, tenant_id: Uuid, after: Option<Uuid>, limit: i64) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            r#"
            SELECT * FROM clients
            WHERE tenant_id = $1 AND deleted_at IS NULL AND status = 'active'
              AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to page active clients")
    }

    /// Clients in `active`/`isolir` holding an open invoice due before `today`.
    pub async fn list_overdue_candidates(&self, tenant_id: Uuid, today: NaiveDate) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            r#"
            SELECT c.* FROM clients c
            WHERE c.tenant_id = $1 AND c.deleted_at IS NULL AND c.status IN ('active', 'isolir')
              AND EXISTS (
                  SELECT 1 FROM invoices i
                  WHERE i.tenant_id = c.tenant_id AND i.client_id = c.id AND i.deleted_at IS NULL
                    AND i.status IN ('pending', 'overdue') AND i.due_date < $2
              )
            ORDER BY c.id
            "#,
        )
        .bind(tenant_id)
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list overdue clients")
    }

    pub async fn code_exists(&self, tenant_id: Uuid, client_code: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clients WHERE tenant_id = $1 AND client_code = $2)")
            .bind(tenant_id)
            .bind(client_code)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check client code")
    }

    pub async fn create(&self, client: &NewClient) -> Result<Client> {
        sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (id, tenant_id, client_code, name, phone, address, category, connection_type,
                                 router_id, pppoe_username, pppoe_password_enc, service_package_id,
                                 voucher_package_id, device_count, group_id, status, payment_tempo_option,
                                 payment_due_day, payment_tempo_template_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 'active', $16, $17, $18)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client.tenant_id)
        .bind(&client.client_code)
        .bind(&client.name)
        .bind(&client.phone)
        .bind(&client.address)
        .bind(client.category.as_str())
        .bind(client.connection_type.as_str())
        .bind(client.router_id)
        .bind(&client.pppoe_username)
        .bind(&client.pppoe_password_enc)
        .bind(client.service_package_id)
        .bind(client.voucher_package_id)
        .bind(client.device_count)
        .bind(client.group_id)
        .bind(client.payment_tempo_option.as_str())
        .bind(client.payment_due_day)
        .bind(client.payment_tempo_template_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create client")
    }

    /// Writes back every editable column of an already validated client.
    pub async fn save(&self, client: &Client) -> Result<Client> {
        sqlx::query_as::<_, Client>(
            r#"
            UPDATE clients SET
                name = $3, phone = $4, address = $5, category = $6, connection_type = $7, router_id = $8,
                pppoe_username = $9, pppoe_password_enc = $10, service_package_id = $11,
                voucher_package_id = $12, device_count = $13, group_id = $14, payment_tempo_option = $15,
                payment_due_day = $16, payment_tempo_template_id = $17, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(client.tenant_id)
        .bind(client.id)
        .bind(&client.name)
        .bind(&client.phone)
        .bind(&client.address)
        .bind(client.category.as_str())
        .bind(client.connection_type.as_str())
        .bind(client.router_id)
        .bind(&client.pppoe_username)
        .bind(&client.pppoe_password_enc)
        .bind(client.service_package_id)
        .bind(client.voucher_package_id)
        .bind(client.device_count)
        .bind(client.group_id)
        .bind(client.payment_tempo_option.as_str())
        .bind(client.payment_due_day)
        .bind(client.payment_tempo_template_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to update client")
    }

    /// Status write guarded by the expected current status.
    pub async fn transition_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        from: ClientStatus,
        to: ClientStatus,
        isolir_reason: Option<&str>,
        isolir_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Client>> {
        sqlx::query_as::<_, Client>(
            r#"
            UPDATE clients SET status = $4, isolir_reason = $5, isolir_at = $6, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND status = $3 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(isolir_reason)
        .bind(isolir_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to change client status")
    }

    pub async fn soft_delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE clients SET deleted_at = NOW(), updated_at = NOW() WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to delete client")?
        .rows_affected();
        Ok(affected > 0)
    }

    /// Retention cleanup; the only path that reads soft-deleted rows.
    pub async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE pppoe_secrets SET client_id = NULL WHERE client_id IN (SELECT id FROM clients WHERE deleted_at IS NOT NULL AND deleted_at < $1)",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let affected = sqlx::query("DELETE FROM clients WHERE deleted_at IS NOT NULL AND deleted_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .context("Failed to purge deleted clients")?
            .rows_affected();

        tx.commit().await?;
        Ok(affected)
    }

    pub async fn get_package(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<ServicePackage>> {
        sqlx::query_as::<_, ServicePackage>(
            "SELECT * FROM service_packages WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch service package")
    }

    pub async fn list_packages(&self, tenant_id: Uuid) -> Result<Vec<ServicePackage>> {
        sqlx::query_as::<_, ServicePackage>(
            "SELECT * FROM service_packages WHERE tenant_id = $1 AND deleted_at IS NULL ORDER BY monthly_fee",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list service packages")
    }

    pub async fn create_package(
        &self,
        tenant_id: Uuid,
        name: &str,
        category: ClientCategory,
        monthly_fee: i64,
        profile_id: Option<Uuid>,
    ) -> Result<ServicePackage> {
        sqlx::query_as::<_, ServicePackage>(
            r#"
            INSERT INTO service_packages (id, tenant_id, name, category, monthly_fee, profile_id, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .bind(category.as_str())
        .bind(monthly_fee)
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create service package")
    }

    pub async fn get_tempo_template(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<PaymentTempoTemplate>> {
        sqlx::query_as::<_, PaymentTempoTemplate>(
            "SELECT * FROM payment_tempo_templates WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch payment tempo template")
    }

    pub async fn create_tempo_template(&self, tenant_id: Uuid, name: &str, due_day: i32) -> Result<PaymentTempoTemplate> {
        sqlx::query_as::<_, PaymentTempoTemplate>(
            "INSERT INTO payment_tempo_templates (id, tenant_id, name, due_day) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .bind(due_day)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create payment tempo template")
    }

    pub async fn group_exists(&self, tenant_id: Uuid, group_id: Uuid) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM client_groups WHERE tenant_id = $1 AND id = $2)")
            .bind(tenant_id)
            .bind(group_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check client group")
    }

    pub async fn create_group(&self, tenant_id: Uuid, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO client_groups (id, tenant_id, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(tenant_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to create client group")?;
        Ok(id)
    }

    /// One target per non-deleted client in the group with a non-empty phone.
    pub async fn list_group_targets(&self, tenant_id: Uuid, group_id: Uuid) -> Result<Vec<RecipientTarget>> {
        sqlx::query_as::<_, RecipientTarget>(
            r#"
            SELECT id AS client_id, phone FROM clients
            WHERE tenant_id = $1 AND group_id = $2 AND deleted_at IS NULL
              AND phone IS NOT NULL AND btrim(phone) <> ''
            ORDER BY created_at, id
            "#,
        )
        .bind(tenant_id)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to resolve group recipients")
    }
}
