//! Reconciles local PPPoE secrets with MikroTik devices.
//!
//! Local writes always commit first. Implicit syncs (create, update, toggle,
//! delete) log router failures and keep going; explicit calls surface them.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netbill_db::models::router::{NetworkProfile, NewPppoeSecret, PppoeSecret, Router, RouterStatus};
use netbill_db::repositories::pppoe_repo::{PppoeRepository, PppoeSecretChanges};
use netbill_db::repositories::router_repo::{NewRouter, RouterRepository};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::isolation_service::SecretToggler;
use crate::crypto::Vault;
use crate::error::{AppError, AppResult};
use crate::features::{FeatureResolver, LIMIT_MAX_ROUTERS};
use crate::metrics::Metrics;
use crate::mikrotik::{ActiveSession, RouterApi, RouterConnector, RouterError, RouterTarget, SecretSpec};

const DEFAULT_API_PORT: i32 = 8728;
const DEFAULT_API_SSL_PORT: i32 = 8729;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "router_id", rename_all = "snake_case")]
pub enum SyncAction {
    Added(String),
    Updated(String),
}

/// Find by username, then add or update. Never trusts a cached device id.
pub async fn reconcile(api: &mut dyn RouterApi, spec: &SecretSpec) -> Result<SyncAction, RouterError> {
    match api.find_secret_id(&spec.username).await? {
        Some(id) => {
            api.update_secret(&id, spec).await?;
            Ok(SyncAction::Updated(id))
        }
        None => Ok(SyncAction::Added(api.add_secret(spec).await?)),
    }
}

pub fn router_target(router: &Router, vault: &Vault) -> AppResult<RouterTarget> {
    let port = u16::try_from(router.api_port)
        .map_err(|_| AppError::InputInvalid(format!("invalid API port {}", router.api_port)))?;
    Ok(RouterTarget {
        name: router.name.clone(),
        host: router.host.clone(),
        port,
        use_tls: router.api_use_tls,
        username: router.username.clone(),
        password: vault.decrypt(&router.password_enc)?,
    })
}

pub fn secret_spec(secret: &PppoeSecret, profile: &NetworkProfile, vault: &Vault) -> AppResult<SecretSpec> {
    Ok(SecretSpec {
        username: secret.username.clone(),
        password: vault.decrypt(&secret.password_enc)?,
        profile: profile.name.clone(),
        service: secret.service.clone(),
        local_address: secret.local_address.clone(),
        remote_address: secret.remote_address.clone(),
        disabled: secret.is_disabled,
        comment: secret.comment.clone(),
    })
}

fn default_service() -> String {
    "pppoe".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSecretInput {
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub router_id: Uuid,
    pub profile_id: Uuid,
    pub username: String,
    pub password: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default)]
    pub local_address: Option<String>,
    #[serde(default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSecretInput {
    pub profile_id: Option<Uuid>,
    pub password: Option<String>,
    pub service: Option<String>,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRouterInput {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub api_port: Option<i32>,
    #[serde(default)]
    pub api_use_tls: bool,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub connectivity_mode: Option<String>,
    #[serde(default)]
    pub nas_ip: Option<String>,
    #[serde(default)]
    pub radius_enabled: bool,
    #[serde(default)]
    pub radius_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProfileInput {
    pub name: String,
    pub download_speed: String,
    pub upload_speed: String,
    #[serde(default)]
    pub local_address: Option<String>,
    #[serde(default)]
    pub remote_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub router_id: Uuid,
    pub status: RouterStatus,
    pub identity: String,
    pub checked_at: DateTime<Utc>,
}

fn non_empty(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::InputInvalid(format!("{} is required", field)));
    }
    Ok(())
}

pub struct RouterSyncService {
    routers: RouterRepository,
    pppoe: PppoeRepository,
    vault: Arc<Vault>,
    connector: Arc<dyn RouterConnector>,
    features: FeatureResolver,
    metrics: Arc<Metrics>,
}

impl RouterSyncService {
    pub fn new(
        routers: RouterRepository,
        pppoe: PppoeRepository,
        vault: Arc<Vault>,
        connector: Arc<dyn RouterConnector>,
        features: FeatureResolver,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            routers,
            pppoe,
            vault,
            connector,
            features,
            metrics,
        }
    }

    // --- Routers and profiles ---

    pub async fn create_router(&self, tenant_id: Uuid, input: CreateRouterInput) -> AppResult<Router> {
        non_empty(&input.name, "name")?;
        non_empty(&input.host, "host")?;
        non_empty(&input.username, "username")?;
        non_empty(&input.password, "password")?;
        if input.radius_enabled && input.nas_ip.as_deref().is_none_or(|ip| ip.trim().is_empty()) {
            return Err(AppError::InputInvalid("nas_ip is required when RADIUS is enabled".into()));
        }
        let api_port = input
            .api_port
            .unwrap_or(if input.api_use_tls { DEFAULT_API_SSL_PORT } else { DEFAULT_API_PORT });
        if !(1..=65535).contains(&api_port) {
            return Err(AppError::InputInvalid(format!("invalid API port {}", api_port)));
        }
        let current = self.routers.count(tenant_id).await?;
        if !self.features.can_add(tenant_id, LIMIT_MAX_ROUTERS, current, 1).await {
            return Err(AppError::Forbidden("router limit for current plan reached".into()));
        }

        let radius_secret_enc = input
            .radius_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| self.vault.encrypt(s))
            .transpose()?;
        let router = self
            .routers
            .create(&NewRouter {
                tenant_id,
                name: input.name.trim().to_string(),
                host: input.host.trim().to_string(),
                api_port,
                api_use_tls: input.api_use_tls,
                username: input.username,
                password_enc: self.vault.encrypt(&input.password)?,
                connectivity_mode: input.connectivity_mode.unwrap_or_else(|| "direct".to_string()),
                nas_ip: input.nas_ip,
                radius_enabled: input.radius_enabled,
                radius_secret_enc,
            })
            .await?;
        info!("Router {} ({}) registered for tenant {}", router.name, router.host, tenant_id);
        Ok(router)
    }

    pub async fn list_routers(&self, tenant_id: Uuid) -> AppResult<Vec<Router>> {
        Ok(self.routers.list(tenant_id).await?)
    }

    pub async fn get_router(&self, tenant_id: Uuid, router_id: Uuid) -> AppResult<Router> {
        self.routers
            .get(tenant_id, router_id)
            .await?
            .ok_or_else(|| AppError::NotFound("router not found".into()))
    }

    pub async fn create_profile(&self, tenant_id: Uuid, input: CreateProfileInput) -> AppResult<NetworkProfile> {
        non_empty(&input.name, "name")?;
        Ok(self
            .routers
            .create_profile(
                tenant_id,
                input.name.trim(),
                &input.download_speed,
                &input.upload_speed,
                input.local_address.as_deref(),
                input.remote_address.as_deref(),
            )
            .await?)
    }

    pub async fn list_profiles(&self, tenant_id: Uuid) -> AppResult<Vec<NetworkProfile>> {
        Ok(self.routers.list_profiles(tenant_id).await?)
    }

    async fn get_profile(&self, tenant_id: Uuid, profile_id: Uuid) -> AppResult<NetworkProfile> {
        self.routers
            .get_profile(tenant_id, profile_id)
            .await?
            .ok_or_else(|| AppError::NotFound("network profile not found".into()))
    }

    // --- Sessions against a device ---

    async fn open(&self, router: &Router) -> AppResult<Box<dyn RouterApi>> {
        let target = router_target(router, &self.vault)?;
        match self.connector.connect(&target).await {
            Ok(api) => Ok(api),
            Err(e) => {
                self.note_contact(router, false).await;
                Err(e.into())
            }
        }
    }

    async fn note_contact(&self, router: &Router, ok: bool) {
        let status = if ok { RouterStatus::Online } else { RouterStatus::Offline };
        if let Err(e) = self
            .routers
            .record_contact(router.tenant_id, router.id, status, Utc::now())
            .await
        {
            warn!("Failed to record contact with router {}: {:#}", router.name, e);
        }
    }

    /// Records the outcome of a device call and converts its error.
    async fn settle<T>(&self, router: &Router, result: Result<T, RouterError>) -> AppResult<T> {
        match result {
            Ok(value) => {
                self.note_contact(router, true).await;
                Ok(value)
            }
            Err(e) => {
                if e.is_unreachable() {
                    self.note_contact(router, false).await;
                }
                Err(e.into())
            }
        }
    }

    pub async fn test_connection(&self, tenant_id: Uuid, router_id: Uuid) -> AppResult<ConnectionReport> {
        let router = self.get_router(tenant_id, router_id).await?;
        let mut api = self.open(&router).await?;
        let identity = api.identity().await;
        let identity = self.settle(&router, identity).await?;
        info!("✅ Router {} reachable (identity {})", router.name, identity);
        Ok(ConnectionReport {
            router_id,
            status: RouterStatus::Online,
            identity,
            checked_at: Utc::now(),
        })
    }

    pub async fn list_sessions(&self, tenant_id: Uuid, router_id: Uuid) -> AppResult<Vec<ActiveSession>> {
        let router = self.get_router(tenant_id, router_id).await?;
        let mut api = self.open(&router).await?;
        let sessions = api.list_active().await;
        self.settle(&router, sessions).await
    }

    pub async fn disconnect_session(&self, tenant_id: Uuid, router_id: Uuid, session_id: &str) -> AppResult<()> {
        non_empty(session_id, "session_id")?;
        let router = self.get_router(tenant_id, router_id).await?;
        let mut api = self.open(&router).await?;
        let result = api.disconnect_active(session_id).await;
        self.settle(&router, result).await?;
        info!("Disconnected session {} on router {}", session_id, router.name);
        Ok(())
    }

    // --- PPPoE secrets ---

    pub async fn list_secrets(&self, tenant_id: Uuid, router_id: Option<Uuid>) -> AppResult<Vec<PppoeSecret>> {
        Ok(self.pppoe.list(tenant_id, router_id).await?)
    }

    pub async fn get_secret(&self, tenant_id: Uuid, secret_id: Uuid) -> AppResult<PppoeSecret> {
        self.pppoe
            .get(tenant_id, secret_id)
            .await?
            .ok_or_else(|| AppError::NotFound("PPPoE secret not found".into()))
    }

    pub async fn create_secret(&self, tenant_id: Uuid, input: CreateSecretInput) -> AppResult<PppoeSecret> {
        let username = input.username.trim().to_string();
        non_empty(&username, "username")?;
        non_empty(&input.password, "password")?;
        if self.pppoe.username_taken(tenant_id, &username, None).await? {
            return Err(AppError::Conflict(format!("PPPoE username '{}' already exists", username)));
        }
        let router = self.get_router(tenant_id, input.router_id).await?;
        self.get_profile(tenant_id, input.profile_id).await?;

        let local_address = match input.local_address.filter(|a| !a.trim().is_empty()) {
            Some(addr) => Some(addr),
            None => self.discover_local_address(&router).await,
        };

        let secret = self
            .pppoe
            .create(&NewPppoeSecret {
                tenant_id,
                client_id: input.client_id,
                router_id: router.id,
                profile_id: input.profile_id,
                username,
                password_enc: self.vault.encrypt(&input.password)?,
                service: input.service,
                local_address,
                remote_address: input.remote_address.filter(|a| !a.trim().is_empty()),
                comment: input.comment,
                is_disabled: input.disabled,
            })
            .await?;

        self.sync_implicit(&secret).await;
        Ok(secret)
    }

    /// Best effort; a silent router just leaves the address empty.
    async fn discover_local_address(&self, router: &Router) -> Option<String> {
        let mut api = match self.open(router).await {
            Ok(api) => api,
            Err(e) => {
                warn!("Could not query local address from router {}: {}", router.name, e);
                return None;
            }
        };
        let result = api.server_local_address().await;
        match self.settle(router, result).await {
            Ok(addr) => {
                debug!("Router {} PPPoE server local address: {:?}", router.name, addr);
                addr
            }
            Err(e) => {
                warn!("Could not query local address from router {}: {}", router.name, e);
                None
            }
        }
    }

    pub async fn update_secret(&self, tenant_id: Uuid, secret_id: Uuid, input: UpdateSecretInput) -> AppResult<PppoeSecret> {
        if let Some(profile_id) = input.profile_id {
            self.get_profile(tenant_id, profile_id).await?;
        }
        let password_enc = match input.password.as_deref() {
            Some(pw) if pw.is_empty() => return Err(AppError::InputInvalid("password cannot be empty".into())),
            Some(pw) => Some(self.vault.encrypt(pw)?),
            None => None,
        };
        let changes = PppoeSecretChanges {
            profile_id: input.profile_id,
            password_enc,
            service: input.service,
            local_address: input.local_address,
            remote_address: input.remote_address,
            comment: input.comment,
        };
        let secret = self
            .pppoe
            .update(tenant_id, secret_id, &changes)
            .await?
            .ok_or_else(|| AppError::NotFound("PPPoE secret not found".into()))?;

        self.sync_implicit(&secret).await;
        Ok(secret)
    }

    pub async fn toggle_secret(&self, tenant_id: Uuid, secret_id: Uuid, disabled: bool) -> AppResult<PppoeSecret> {
        let secret = self
            .pppoe
            .set_disabled(tenant_id, secret_id, disabled)
            .await?
            .ok_or_else(|| AppError::NotFound("PPPoE secret not found".into()))?;
        self.sync_implicit(&secret).await;
        Ok(secret)
    }

    pub async fn delete_secret(&self, tenant_id: Uuid, secret_id: Uuid) -> AppResult<()> {
        let secret = self
            .pppoe
            .delete(tenant_id, secret_id)
            .await?
            .ok_or_else(|| AppError::NotFound("PPPoE secret not found".into()))?;

        if let Err(e) = self.remove_from_router(&secret).await {
            Metrics::incr(&self.metrics.router_sync_failures);
            warn!("PPPoE secret {} deleted locally but router removal failed: {}", secret.username, e);
        }
        Ok(())
    }

    async fn remove_from_router(&self, secret: &PppoeSecret) -> AppResult<bool> {
        let router = self.get_router(secret.tenant_id, secret.router_id).await?;
        let mut api = self.open(&router).await?;
        let result = api.remove_secret_by_username(&secret.username).await;
        self.settle(&router, result).await
    }

    /// "Sync to Router": failures propagate.
    pub async fn sync_secret(&self, tenant_id: Uuid, secret_id: Uuid) -> AppResult<SyncAction> {
        let secret = self.get_secret(tenant_id, secret_id).await?;
        match self.push(&secret).await {
            Ok(action) => Ok(action),
            Err(e) => {
                Metrics::incr(&self.metrics.router_sync_failures);
                Err(e)
            }
        }
    }

    async fn push(&self, secret: &PppoeSecret) -> AppResult<SyncAction> {
        let router = self.get_router(secret.tenant_id, secret.router_id).await?;
        let profile = self.get_profile(secret.tenant_id, secret.profile_id).await?;
        let spec = secret_spec(secret, &profile, &self.vault)?;

        let mut api = self.open(&router).await?;
        let result = reconcile(api.as_mut(), &spec).await;
        let action = self.settle(&router, result).await?;
        debug!("PPPoE secret {} on {}: {:?}", secret.username, router.name, action);
        Ok(action)
    }

    async fn sync_implicit(&self, secret: &PppoeSecret) {
        if let Err(e) = self.push(secret).await {
            Metrics::incr(&self.metrics.router_sync_failures);
            warn!("Router sync for PPPoE secret {} failed; local state kept: {}", secret.username, e);
        }
    }
}

#[async_trait]
impl SecretToggler for RouterSyncService {
    async fn set_client_disabled(&self, tenant_id: Uuid, client_id: Uuid, disabled: bool) -> anyhow::Result<bool> {
        let Some(secret) = self.pppoe.get_by_client(tenant_id, client_id).await? else {
            return Ok(false);
        };
        let updated = self
            .pppoe
            .set_disabled(tenant_id, secret.id, disabled)
            .await?
            .context("PPPoE secret disappeared while toggling")?;
        self.sync_implicit(&updated).await;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Device state shared between sessions: secret id to spec.
    #[derive(Clone, Default)]
    pub struct FakeDevice {
        pub secrets: Arc<Mutex<BTreeMap<String, SecretSpec>>>,
        pub sessions: Arc<Mutex<Vec<ActiveSession>>>,
        pub calls: Arc<Mutex<Vec<String>>>,
        pub unreachable: bool,
    }

    impl FakeDevice {
        fn log(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        pub fn by_username(&self, username: &str) -> Option<SecretSpec> {
            self.secrets.lock().unwrap().values().find(|s| s.username == username).cloned()
        }
    }

    #[async_trait]
    impl RouterApi for FakeDevice {
        async fn find_secret_id(&mut self, username: &str) -> Result<Option<String>, RouterError> {
            self.log("find");
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .iter()
                .find(|(_, s)| s.username == username)
                .map(|(id, _)| id.clone()))
        }

        async fn add_secret(&mut self, spec: &SecretSpec) -> Result<String, RouterError> {
            self.log("add");
            let mut secrets = self.secrets.lock().unwrap();
            let id = format!("*{:X}", secrets.len() + 1);
            secrets.insert(id.clone(), spec.clone());
            Ok(id)
        }

        async fn update_secret(&mut self, id: &str, spec: &SecretSpec) -> Result<(), RouterError> {
            self.log("update");
            self.secrets.lock().unwrap().insert(id.to_string(), spec.clone());
            Ok(())
        }

        async fn remove_secret_by_username(&mut self, username: &str) -> Result<bool, RouterError> {
            self.log("remove");
            let mut secrets = self.secrets.lock().unwrap();
            let before = secrets.len();
            secrets.retain(|_, s| s.username != username);
            Ok(secrets.len() != before)
        }

        async fn list_active(&mut self) -> Result<Vec<ActiveSession>, RouterError> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn disconnect_active(&mut self, session_id: &str) -> Result<(), RouterError> {
            self.sessions.lock().unwrap().retain(|s| s.id != session_id);
            Ok(())
        }

        async fn server_local_address(&mut self) -> Result<Option<String>, RouterError> {
            Ok(Some("10.10.0.1".into()))
        }

        async fn identity(&mut self) -> Result<String, RouterError> {
            Ok("fake-ros".into())
        }
    }

    #[async_trait]
    impl RouterConnector for FakeDevice {
        async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn RouterApi>, RouterError> {
            if self.unreachable {
                return Err(RouterError::classify(&target.name, "connection refused"));
            }
            Ok(Box::new(self.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeDevice;
    use super::*;

    fn spec(profile: &str, disabled: bool) -> SecretSpec {
        SecretSpec {
            username: "budi".into(),
            password: "s3cret".into(),
            profile: profile.into(),
            service: "pppoe".into(),
            local_address: Some("10.10.0.1".into()),
            remote_address: None,
            disabled,
            comment: None,
        }
    }

    #[tokio::test]
    async fn first_sync_adds_then_updates_in_place() {
        let mut device = FakeDevice::default();

        let first = reconcile(&mut device, &spec("10M", false)).await.unwrap();
        assert!(matches!(first, SyncAction::Added(_)));
        let second = reconcile(&mut device, &spec("20M", true)).await.unwrap();
        assert!(matches!(second, SyncAction::Updated(_)));

        assert_eq!(device.secrets.lock().unwrap().len(), 1);
        let stored = device.by_username("budi").unwrap();
        assert_eq!(stored.profile, "20M");
        assert!(stored.disabled);
    }

    #[tokio::test]
    async fn add_then_update_equals_update_alone() {
        let mut fresh = FakeDevice::default();
        reconcile(&mut fresh, &spec("10M", false)).await.unwrap();
        reconcile(&mut fresh, &spec("10M", false)).await.unwrap();

        let mut seeded = FakeDevice::default();
        seeded.secrets.lock().unwrap().insert("*1".into(), spec("old", true));
        reconcile(&mut seeded, &spec("10M", false)).await.unwrap();

        assert_eq!(*fresh.secrets.lock().unwrap(), *seeded.secrets.lock().unwrap());
        assert_eq!(*seeded.calls.lock().unwrap(), vec!["find", "update"]);
    }

    #[tokio::test]
    async fn unreachable_connector_surfaces_typed_error() {
        let device = FakeDevice { unreachable: true, ..Default::default() };
        let target = RouterTarget {
            name: "core-1".into(),
            host: "10.0.0.1".into(),
            port: 8728,
            use_tls: false,
            username: "api".into(),
            password: "pw".into(),
        };
        let err = match device.connect(&target).await {
            Err(e) => e,
            Ok(_) => panic!("expected connection failure"),
        };
        assert!(err.is_unreachable());
        assert_eq!(AppError::from(err).code(), "router_unreachable");
    }

    #[test]
    fn router_target_decrypts_admin_password() {
        let vault = Vault::new("unit-test-master").unwrap();
        let router = Router {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "core-1".into(),
            router_type: netbill_db::models::router::RouterType::Mikrotik,
            host: "10.0.0.1".into(),
            api_port: 8729,
            api_use_tls: true,
            username: "api".into(),
            password_enc: vault.encrypt("router-pass").unwrap(),
            connectivity_mode: "direct".into(),
            nas_ip: None,
            radius_enabled: false,
            radius_secret_enc: None,
            status: RouterStatus::Unknown,
            last_seen: None,
            created_at: Utc::now(),
        };
        let target = router_target(&router, &vault).unwrap();
        assert_eq!(target.password, "router-pass");
        assert_eq!(target.port, 8729);
        assert!(target.use_tls);

        let broken = Router { api_port: 70_000, ..router };
        assert!(matches!(router_target(&broken, &vault), Err(AppError::InputInvalid(_))));
    }
}
