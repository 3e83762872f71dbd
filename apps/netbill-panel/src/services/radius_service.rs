//! Records RADIUS decisions and accounting relayed by NAS devices.
//! The panel never speaks the RADIUS wire protocol itself.

use std::sync::Arc;

use netbill_db::models::radius::RadiusSession;
use netbill_db::models::router::{PppoeSecret, Router};
use netbill_db::repositories::pppoe_repo::PppoeRepository;
use netbill_db::repositories::radius_repo::{AccountingRecord, RadiusRepository};
use netbill_db::repositories::router_repo::RouterRepository;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::Vault;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AuthRequest {
    pub nas_ip: String,
    #[serde(default)]
    pub nas_secret: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub calling_station_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthDecision {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcctStatus {
    Start,
    Interim,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountingRequest {
    pub nas_ip: String,
    #[serde(default)]
    pub nas_secret: Option<String>,
    pub status_type: AcctStatus,
    pub session_id: String,
    pub username: String,
    #[serde(default)]
    pub framed_ip: Option<String>,
    #[serde(default)]
    pub input_octets: i64,
    #[serde(default)]
    pub output_octets: i64,
    #[serde(default)]
    pub terminate_cause: Option<String>,
}

/// `stored` is the decrypted password of the matching secret, if any.
pub fn decide(secret: Option<&PppoeSecret>, stored: Option<&str>, given: &str) -> AuthDecision {
    let reason = match (secret, stored) {
        (None, _) => Some("unknown_user"),
        (Some(s), _) if s.is_disabled => Some("disabled"),
        (Some(_), Some(pw)) if pw == given => None,
        _ => Some("bad_password"),
    };
    AuthDecision {
        accepted: reason.is_none(),
        reason,
    }
}

pub struct RadiusService {
    routers: RouterRepository,
    pppoe: PppoeRepository,
    radius: RadiusRepository,
    vault: Arc<Vault>,
}

impl RadiusService {
    pub fn new(routers: RouterRepository, pppoe: PppoeRepository, radius: RadiusRepository, vault: Arc<Vault>) -> Self {
        Self {
            routers,
            pppoe,
            radius,
            vault,
        }
    }

    /// Tenant comes from the NAS, never from the request host.
    async fn nas(&self, nas_ip: &str, nas_secret: Option<&str>) -> AppResult<Router> {
        let router = self
            .routers
            .find_radius_by_nas_ip(nas_ip.trim())
            .await?
            .ok_or_else(|| AppError::NotFound("unknown NAS".into()))?;
        if let Some(enc) = router.radius_secret_enc.as_deref() {
            let expected = self.vault.decrypt(enc)?;
            if nas_secret != Some(expected.as_str()) {
                warn!("RADIUS request from {} with wrong shared secret", nas_ip);
                return Err(AppError::Unauthorized("NAS shared secret mismatch".into()));
            }
        }
        Ok(router)
    }

    pub async fn authenticate(&self, req: AuthRequest) -> AppResult<AuthDecision> {
        let router = self.nas(&req.nas_ip, req.nas_secret.as_deref()).await?;
        let username = req.username.trim();
        let secret = self.pppoe.get_by_username(router.tenant_id, username).await?;
        let stored = match secret.as_ref() {
            Some(s) => Some(self.vault.decrypt(&s.password_enc)?),
            None => None,
        };
        let decision = decide(secret.as_ref(), stored.as_deref(), &req.password);

        self.radius
            .insert_auth_log(
                router.tenant_id,
                router.id,
                username,
                decision.accepted,
                decision.reason,
                req.calling_station_id.as_deref(),
            )
            .await?;
        debug!("RADIUS auth {} via {}: {:?}", username, router.name, decision);
        Ok(decision)
    }

    pub async fn accounting(&self, req: AccountingRequest) -> AppResult<RadiusSession> {
        if req.session_id.trim().is_empty() {
            return Err(AppError::InputInvalid("session_id is required".into()));
        }
        let router = self.nas(&req.nas_ip, req.nas_secret.as_deref()).await?;
        let stop = req.status_type == AcctStatus::Stop;

        let session = self
            .radius
            .upsert_session(&AccountingRecord {
                tenant_id: router.tenant_id,
                router_id: router.id,
                session_id: req.session_id,
                username: req.username.trim().to_string(),
                framed_ip: req.framed_ip,
                input_octets: req.input_octets.max(0),
                output_octets: req.output_octets.max(0),
                stop,
                terminate_cause: if stop { req.terminate_cause } else { None },
            })
            .await?;

        if !stop {
            self.pppoe
                .touch_last_connected(router.tenant_id, &session.username)
                .await?;
        }
        Ok(session)
    }

    pub async fn open_sessions(&self, tenant_id: uuid::Uuid) -> AppResult<Vec<RadiusSession>> {
        Ok(self.radius.list_open_sessions(tenant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn secret(disabled: bool) -> PppoeSecret {
        PppoeSecret {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            client_id: None,
            router_id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            username: "budi".into(),
            password_enc: String::new(),
            service: "pppoe".into(),
            local_address: None,
            remote_address: None,
            comment: None,
            is_disabled: disabled,
            last_connected_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn decisions_cover_each_rejection() {
        let active = secret(false);
        assert_eq!(decide(Some(&active), Some("pw"), "pw"), AuthDecision { accepted: true, reason: None });
        assert_eq!(decide(Some(&active), Some("pw"), "nope").reason, Some("bad_password"));
        assert_eq!(decide(None, None, "pw").reason, Some("unknown_user"));
        assert_eq!(decide(Some(&secret(true)), Some("pw"), "pw").reason, Some("disabled"));
    }

    #[test]
    fn accounting_status_parses_lowercase() {
        let req: AccountingRequest = serde_json::from_value(serde_json::json!({
            "nas_ip": "10.0.0.1",
            "status_type": "interim",
            "session_id": "81a00002",
            "username": "budi",
        }))
        .unwrap();
        assert_eq!(req.status_type, AcctStatus::Interim);
        assert_eq!(req.input_octets, 0);
    }
}
