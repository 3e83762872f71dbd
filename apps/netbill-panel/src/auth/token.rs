//! HS256 access and refresh tokens.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use netbill_db::models::user::{Role, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Uuid,
    /// Nil UUID for platform super-admins.
    pub tenant_id: Uuid,
    pub role: Role,
    pub email: String,
    pub kind: TokenKind,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn is_super_admin(&self) -> bool {
        self.tenant_id.is_nil() || self.role == Role::SuperAdmin
    }

    pub fn tenant(&self) -> Option<Uuid> {
        (!self.tenant_id.is_nil()).then_some(self.tenant_id)
    }

    /// Seconds until expiry, never negative.
    pub fn remaining_secs(&self, now: i64) -> u64 {
        (self.exp - now).max(0) as u64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue(user, TokenKind::Access)?,
            refresh_token: self.issue(user, TokenKind::Refresh)?,
            token_type: "Bearer",
            expires_in: self.access_ttl_secs,
        })
    }

    pub fn issue(&self, user: &User, kind: TokenKind) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };
        let claims = Claims {
            user_id: user.id,
            tenant_id: user.tenant_id.unwrap_or(Uuid::nil()),
            role: user.role,
            email: user.email.clone(),
            kind,
            jti: Uuid::new_v4(),
            iat: now,
            exp: now + ttl,
        };
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("JWT encode: {e}")))
    }

    /// Verifies signature and expiry, then checks the token kind.
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            })?;

        if claims.kind != expected {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbill_db::models::user::UserStatus;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn user(tenant_id: Option<Uuid>, role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            tenant_id,
            role,
            email: "ops@isp.test".into(),
            name: "Ops".into(),
            password_hash: String::new(),
            status: UserStatus::Active,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn access_token_carries_identity() {
        let svc = TokenService::new(SECRET, 900, 3600);
        let tenant = Uuid::new_v4();
        let u = user(Some(tenant), Role::Admin);
        let pair = svc.issue_pair(&u).unwrap();

        let claims = svc.decode(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(claims.user_id, u.id);
        assert_eq!(claims.tenant_id, tenant);
        assert_eq!(claims.role, Role::Admin);
        assert!(!claims.is_super_admin());
        assert_eq!(pair.expires_in, 900);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let svc = TokenService::new(SECRET, 900, 3600);
        let pair = svc.issue_pair(&user(Some(Uuid::new_v4()), Role::Staff)).unwrap();
        assert!(matches!(svc.decode(&pair.refresh_token, TokenKind::Access), Err(AuthError::TokenInvalid)));
        assert!(svc.decode(&pair.refresh_token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn expired_and_invalid_are_distinguished() {
        let svc = TokenService::new(SECRET, 900, 3600);
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role: Role::Owner,
            email: "a@b.test".into(),
            kind: TokenKind::Access,
            jti: Uuid::new_v4(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let expired = svc.encode(&claims).unwrap();
        assert!(matches!(svc.decode(&expired, TokenKind::Access), Err(AuthError::TokenExpired)));

        let other = TokenService::new("ffffffffffffffffffffffffffffffff", 900, 3600);
        let forged = other.issue(&user(None, Role::SuperAdmin), TokenKind::Access).unwrap();
        assert!(matches!(svc.decode(&forged, TokenKind::Access), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn platform_users_get_nil_tenant() {
        let svc = TokenService::new(SECRET, 900, 3600);
        let token = svc.issue(&user(None, Role::SuperAdmin), TokenKind::Access).unwrap();
        let claims = svc.decode(&token, TokenKind::Access).unwrap();
        assert!(claims.tenant_id.is_nil());
        assert!(claims.is_super_admin());
        assert_eq!(claims.tenant(), None);
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }
}
