//! Per-route capability and feature requirements.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::TenantContext;
use crate::AppState;
use crate::auth::Claims;
use crate::error::AppError;
use crate::rbac::{self, Capability};

#[derive(Clone)]
pub struct Gate {
    state: AppState,
    capabilities: &'static [Capability],
    features: &'static [&'static str],
}

impl Gate {
    pub fn new(state: &AppState, capabilities: &'static [Capability], features: &'static [&'static str]) -> Self {
        Self {
            state: state.clone(),
            capabilities,
            features,
        }
    }
}

pub fn check_capabilities(claims: &Claims, required: &[Capability]) -> Result<(), AppError> {
    let missing = rbac::missing(claims.role, required);
    if missing.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = missing.iter().map(|c| c.to_string()).collect();
    Err(AppError::Forbidden(format!(
        "role {} lacks {}",
        claims.role,
        names.join(", ")
    )))
}

pub async fn enforce(State(gate): State<Gate>, req: Request, next: Next) -> Response {
    let Some(claims) = req.extensions().get::<Claims>() else {
        return AppError::Unauthorized("authentication required".into()).into_response();
    };
    if let Err(e) = check_capabilities(claims, gate.capabilities) {
        return e.into_response();
    }

    if !gate.features.is_empty() {
        // Platform users acting without a tenant have no plan to check.
        if let Some(tenant) = req.extensions().get::<TenantContext>() {
            let missing = gate.state.features.missing(tenant.id, gate.features).await;
            if !missing.is_empty() {
                return AppError::FeatureMissing(missing).into_response();
            }
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenKind;
    use chrono::Utc;
    use netbill_db::models::user::Role;
    use uuid::Uuid;

    fn claims(role: Role) -> Claims {
        Claims {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role,
            email: "c@isp.test".into(),
            kind: TokenKind::Access,
            jti: Uuid::new_v4(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 900,
        }
    }

    #[test]
    fn missing_capabilities_are_named() {
        let err = check_capabilities(&claims(Role::Collector), &[Capability::PaymentsWrite]).unwrap_err();
        assert_eq!(err.code(), "forbidden");
        assert!(err.to_string().contains("payments.write"));
        assert!(check_capabilities(&claims(Role::Staff), &[Capability::PaymentsWrite]).is_ok());
    }
}
