//! Subscriber records: invariants, codes, tempo resolution and manual status changes.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use netbill_db::models::client::{
    Client, ClientCategory, ClientStatus, ConnectionType, NewClient, PaymentTempoOption, PaymentTempoTemplate,
    ServicePackage, generate_client_code,
};
use netbill_db::repositories::client_repo::{ClientFilter, ClientRepository};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::isolation_service::SecretToggler;
use crate::crypto::Vault;
use crate::error::{AppError, AppResult};
use crate::features::{FeatureResolver, LIMIT_MAX_CLIENTS};

const CODE_ATTEMPTS: usize = 5;

fn default_connection_type() -> ConnectionType {
    ConnectionType::Pppoe
}

fn default_tempo() -> PaymentTempoOption {
    PaymentTempoOption::Default
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClientInput {
    #[serde(default)]
    pub client_code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub category: ClientCategory,
    #[serde(default = "default_connection_type")]
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub router_id: Option<Uuid>,
    #[serde(default)]
    pub pppoe_username: Option<String>,
    #[serde(default)]
    pub pppoe_password: Option<String>,
    pub service_package_id: Uuid,
    #[serde(default)]
    pub voucher_package_id: Option<Uuid>,
    #[serde(default)]
    pub device_count: Option<i32>,
    #[serde(default)]
    pub group_id: Option<Uuid>,
    #[serde(default = "default_tempo")]
    pub payment_tempo_option: PaymentTempoOption,
    #[serde(default)]
    pub payment_due_day: Option<i32>,
    #[serde(default)]
    pub payment_tempo_template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateClientInput {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub category: Option<ClientCategory>,
    pub connection_type: Option<ConnectionType>,
    pub router_id: Option<Uuid>,
    pub pppoe_username: Option<String>,
    pub pppoe_password: Option<String>,
    pub service_package_id: Option<Uuid>,
    pub voucher_package_id: Option<Uuid>,
    pub device_count: Option<i32>,
    pub group_id: Option<Uuid>,
    pub payment_tempo_option: Option<PaymentTempoOption>,
    pub payment_due_day: Option<i32>,
    pub payment_tempo_template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChangeInput {
    pub status: ClientStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The fields the package/category rules look at.
#[derive(Debug, Clone, Copy)]
pub struct ServiceShape<'a> {
    pub category: ClientCategory,
    pub pppoe_username: Option<&'a str>,
    pub has_password: bool,
    pub device_count: Option<i32>,
}

fn blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

pub fn validate_service(shape: ServiceShape<'_>, package: &ServicePackage) -> AppResult<()> {
    if package.category != shape.category {
        return Err(AppError::InputInvalid(format!(
            "package category {} does not match client category {}",
            package.category, shape.category
        )));
    }
    if shape.category == ClientCategory::Lite {
        if !blank(shape.pppoe_username) || shape.has_password {
            return Err(AppError::InputInvalid("lite clients cannot carry PPPoE credentials".into()));
        }
        if shape.device_count.is_none_or(|n| n < 1) {
            return Err(AppError::InputInvalid("device_count must be at least 1 for lite clients".into()));
        }
    } else {
        if blank(shape.pppoe_username) || !shape.has_password {
            return Err(AppError::InputInvalid("PPPoE username and password are required".into()));
        }
        if shape.device_count.is_some() {
            return Err(AppError::InputInvalid("device_count only applies to lite clients".into()));
        }
    }
    Ok(())
}

/// Due day for the chosen tempo option; `default` takes the creation day.
pub fn resolve_due_day(
    option: PaymentTempoOption,
    manual_day: Option<i32>,
    template: Option<&PaymentTempoTemplate>,
    created_on: NaiveDate,
) -> AppResult<i32> {
    let day = match option {
        PaymentTempoOption::Default => created_on.day() as i32,
        PaymentTempoOption::Manual => {
            manual_day.ok_or_else(|| AppError::InputInvalid("payment_due_day is required for manual tempo".into()))?
        }
        PaymentTempoOption::Template => {
            template
                .ok_or_else(|| AppError::InputInvalid("payment_tempo_template_id is required for template tempo".into()))?
                .due_day
        }
    };
    if !(1..=31).contains(&day) {
        return Err(AppError::InputInvalid(format!("payment_due_day {} out of range 1..=31", day)));
    }
    Ok(day)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub struct ClientService {
    clients: ClientRepository,
    features: FeatureResolver,
    vault: Arc<Vault>,
    toggler: Arc<dyn SecretToggler>,
}

impl ClientService {
    pub fn new(
        clients: ClientRepository,
        features: FeatureResolver,
        vault: Arc<Vault>,
        toggler: Arc<dyn SecretToggler>,
    ) -> Self {
        Self {
            clients,
            features,
            vault,
            toggler,
        }
    }

    pub async fn list(&self, tenant_id: Uuid, filter: &ClientFilter, limit: i64, offset: i64) -> AppResult<Vec<Client>> {
        Ok(self.clients.list(tenant_id, filter, limit, offset).await?)
    }

    pub async fn get(&self, tenant_id: Uuid, client_id: Uuid) -> AppResult<Client> {
        self.clients
            .get(tenant_id, client_id)
            .await?
            .ok_or_else(|| AppError::NotFound("client not found".into()))
    }

    async fn package(&self, tenant_id: Uuid, package_id: Uuid) -> AppResult<ServicePackage> {
        self.clients
            .get_package(tenant_id, package_id)
            .await?
            .ok_or_else(|| AppError::InputInvalid("service package not found".into()))
    }

    async fn template(&self, tenant_id: Uuid, template_id: Option<Uuid>) -> AppResult<Option<PaymentTempoTemplate>> {
        match template_id {
            Some(id) => Ok(Some(
                self.clients
                    .get_tempo_template(tenant_id, id)
                    .await?
                    .ok_or_else(|| AppError::InputInvalid("payment tempo template not found".into()))?,
            )),
            None => Ok(None),
        }
    }

    async fn allocate_code(&self, tenant_id: Uuid, requested: Option<String>, today: NaiveDate) -> AppResult<String> {
        if let Some(code) = trimmed(requested) {
            if self.clients.code_exists(tenant_id, &code).await? {
                return Err(AppError::Conflict(format!("client code '{}' already exists", code)));
            }
            return Ok(code);
        }
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_client_code(today);
            if !self.clients.code_exists(tenant_id, &code).await? {
                return Ok(code);
            }
        }
        Err(AppError::Conflict("could not allocate a unique client code".into()))
    }

    pub async fn create(&self, tenant_id: Uuid, input: CreateClientInput) -> AppResult<Client> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::InputInvalid("name is required".into()));
        }

        let current = self.clients.count(tenant_id).await?;
        if !self.features.can_add(tenant_id, LIMIT_MAX_CLIENTS, current, 1).await {
            return Err(AppError::Forbidden("client limit for current plan reached".into()));
        }

        let package = self.package(tenant_id, input.service_package_id).await?;
        let pppoe_username = trimmed(input.pppoe_username);
        let pppoe_password = input.pppoe_password.filter(|p| !p.is_empty());
        validate_service(
            ServiceShape {
                category: input.category,
                pppoe_username: pppoe_username.as_deref(),
                has_password: pppoe_password.is_some(),
                device_count: input.device_count,
            },
            &package,
        )?;

        let today = Utc::now().date_naive();
        let template = self.template(tenant_id, input.payment_tempo_template_id).await?;
        let payment_due_day = resolve_due_day(
            input.payment_tempo_option,
            input.payment_due_day,
            template.as_ref(),
            today,
        )?;
        let client_code = self.allocate_code(tenant_id, input.client_code, today).await?;
        let pppoe_password_enc = pppoe_password.as_deref().map(|p| self.vault.encrypt(p)).transpose()?;

        let client = self
            .clients
            .create(&NewClient {
                tenant_id,
                client_code,
                name,
                phone: trimmed(input.phone),
                address: trimmed(input.address),
                category: input.category,
                connection_type: input.connection_type,
                router_id: input.router_id,
                pppoe_username,
                pppoe_password_enc,
                service_package_id: package.id,
                voucher_package_id: input.voucher_package_id,
                device_count: input.device_count,
                group_id: input.group_id,
                payment_tempo_option: input.payment_tempo_option,
                payment_due_day,
                payment_tempo_template_id: template.map(|t| t.id),
            })
            .await?;
        info!("Client {} created for tenant {}", client.client_code, tenant_id);
        Ok(client)
    }

    pub async fn update(&self, tenant_id: Uuid, client_id: Uuid, input: UpdateClientInput) -> AppResult<Client> {
        let mut client = self.get(tenant_id, client_id).await?;

        if let Some(name) = trimmed(input.name) {
            client.name = name;
        }
        if input.phone.is_some() {
            client.phone = trimmed(input.phone);
        }
        if input.address.is_some() {
            client.address = trimmed(input.address);
        }
        if let Some(category) = input.category {
            client.category = category;
            if category == ClientCategory::Lite {
                client.pppoe_username = None;
                client.pppoe_password_enc = None;
            } else {
                client.device_count = None;
            }
        }
        if let Some(connection_type) = input.connection_type {
            client.connection_type = connection_type;
        }
        if input.router_id.is_some() {
            client.router_id = input.router_id;
        }
        if input.pppoe_username.is_some() {
            client.pppoe_username = trimmed(input.pppoe_username);
        }
        if let Some(password) = input.pppoe_password.filter(|p| !p.is_empty()) {
            client.pppoe_password_enc = Some(self.vault.encrypt(&password)?);
        }
        if let Some(package_id) = input.service_package_id {
            client.service_package_id = package_id;
        }
        if input.voucher_package_id.is_some() {
            client.voucher_package_id = input.voucher_package_id;
        }
        if input.device_count.is_some() {
            client.device_count = input.device_count;
        }
        if input.group_id.is_some() {
            client.group_id = input.group_id;
        }

        let package = self.package(tenant_id, client.service_package_id).await?;
        validate_service(
            ServiceShape {
                category: client.category,
                pppoe_username: client.pppoe_username.as_deref(),
                has_password: client.pppoe_password_enc.is_some(),
                device_count: client.device_count,
            },
            &package,
        )?;

        let tempo_changed =
            input.payment_tempo_option.is_some() || input.payment_due_day.is_some() || input.payment_tempo_template_id.is_some();
        if tempo_changed {
            let option = input.payment_tempo_option.unwrap_or(client.payment_tempo_option);
            let template_id = match option {
                PaymentTempoOption::Template => input.payment_tempo_template_id.or(client.payment_tempo_template_id),
                _ => None,
            };
            let template = self.template(tenant_id, template_id).await?;
            client.payment_due_day = resolve_due_day(
                option,
                input.payment_due_day.or(Some(client.payment_due_day)),
                template.as_ref(),
                client.created_at.date_naive(),
            )?;
            client.payment_tempo_option = option;
            client.payment_tempo_template_id = template.map(|t| t.id);
        }

        Ok(self.clients.save(&client).await?)
    }

    /// Manual status change through the legality table. Router credentials
    /// follow: only `active` keeps the PPPoE secret enabled.
    pub async fn change_status(&self, tenant_id: Uuid, client_id: Uuid, input: StatusChangeInput) -> AppResult<Client> {
        let client = self.get(tenant_id, client_id).await?;
        let to = input.status;
        if !client.status.can_transition_to(to) {
            return Err(AppError::Conflict(format!(
                "cannot change client status from {} to {}",
                client.status, to
            )));
        }

        let (reason, at) = match to {
            ClientStatus::Isolir => (Some(input.reason.unwrap_or_else(|| "manual".to_string())), Some(Utc::now())),
            _ => (None, None),
        };
        let updated = self
            .clients
            .transition_status(tenant_id, client_id, client.status, to, reason.as_deref(), at)
            .await?
            .ok_or_else(|| AppError::Conflict("client status changed concurrently".into()))?;

        let disabled = to != ClientStatus::Active;
        if let Err(e) = self.toggler.set_client_disabled(tenant_id, client_id, disabled).await {
            warn!("Client {} is now {} but its PPPoE secret was not updated: {:#}", updated.client_code, to, e);
        }
        info!("Client {} status {} -> {}", updated.client_code, client.status, to);
        Ok(updated)
    }

    pub async fn delete(&self, tenant_id: Uuid, client_id: Uuid) -> AppResult<()> {
        if !self.clients.soft_delete(tenant_id, client_id).await? {
            return Err(AppError::NotFound("client not found".into()));
        }
        info!("Client {} soft-deleted for tenant {}", client_id, tenant_id);
        Ok(())
    }

    pub async fn list_packages(&self, tenant_id: Uuid) -> AppResult<Vec<ServicePackage>> {
        Ok(self.clients.list_packages(tenant_id).await?)
    }

    pub async fn create_package(
        &self,
        tenant_id: Uuid,
        name: &str,
        category: ClientCategory,
        monthly_fee: i64,
        profile_id: Option<Uuid>,
    ) -> AppResult<ServicePackage> {
        if name.trim().is_empty() {
            return Err(AppError::InputInvalid("name is required".into()));
        }
        if monthly_fee < 0 {
            return Err(AppError::InputInvalid("monthly_fee cannot be negative".into()));
        }
        Ok(self
            .clients
            .create_package(tenant_id, name.trim(), category, monthly_fee, profile_id)
            .await?)
    }

    pub async fn create_tempo_template(&self, tenant_id: Uuid, name: &str, due_day: i32) -> AppResult<PaymentTempoTemplate> {
        if name.trim().is_empty() {
            return Err(AppError::InputInvalid("name is required".into()));
        }
        if !(1..=31).contains(&due_day) {
            return Err(AppError::InputInvalid(format!("due_day {} out of range 1..=31", due_day)));
        }
        Ok(self.clients.create_tempo_template(tenant_id, name.trim(), due_day).await?)
    }

    pub async fn create_group(&self, tenant_id: Uuid, name: &str) -> AppResult<Uuid> {
        if name.trim().is_empty() {
            return Err(AppError::InputInvalid("name is required".into()));
        }
        Ok(self.clients.create_group(tenant_id, name.trim()).await?)
    }
}
