use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::TenantContext;
use crate::AppState;
use crate::auth::token::bearer_token;
use crate::auth::{Claims, TokenKind};
use crate::error::AppError;

/// Tenant users may only act inside their own tenant; platform users may
/// act anywhere.
pub fn check_tenant_binding(claims: &Claims, tenant: Option<&TenantContext>) -> Result<(), AppError> {
    match tenant {
        Some(ctx) if !claims.is_super_admin() && claims.tenant_id != ctx.id => {
            Err(AppError::Forbidden("token does not belong to this tenant".into()))
        }
        _ => Ok(()),
    }
}

pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let raw = req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let Some(token) = bearer_token(raw) else {
        return AppError::Unauthorized("missing bearer token".into()).into_response();
    };
    let claims = match state.auth.tokens().decode(token, TokenKind::Access) {
        Ok(claims) => claims,
        Err(e) => return AppError::from(e).into_response(),
    };
    if let Err(e) = check_tenant_binding(&claims, req.extensions().get::<TenantContext>()) {
        return e.into_response();
    }

    req.extensions_mut().insert(claims.clone());
    let mut res = next.run(req).await;
    res.extensions_mut().insert(claims);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use netbill_db::models::user::Role;
    use uuid::Uuid;

    fn claims(tenant_id: Uuid, role: Role) -> Claims {
        Claims {
            user_id: Uuid::new_v4(),
            tenant_id,
            role,
            email: "ops@isp.test".into(),
            kind: TokenKind::Access,
            jti: Uuid::new_v4(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 900,
        }
    }

    #[test]
    fn cross_tenant_tokens_are_forbidden() {
        let home = Uuid::new_v4();
        let ctx = TenantContext { id: Uuid::new_v4(), slug: "other".into() };
        let err = check_tenant_binding(&claims(home, Role::Owner), Some(&ctx)).unwrap_err();
        assert_eq!(err.code(), "forbidden");

        let own = TenantContext { id: home, slug: "home".into() };
        assert!(check_tenant_binding(&claims(home, Role::Owner), Some(&own)).is_ok());
        assert!(check_tenant_binding(&claims(home, Role::Owner), None).is_ok());
    }

    #[test]
    fn platform_tokens_cross_tenants() {
        let ctx = TenantContext { id: Uuid::new_v4(), slug: "acme".into() };
        assert!(check_tenant_binding(&claims(Uuid::nil(), Role::SuperAdmin), Some(&ctx)).is_ok());
    }
}
