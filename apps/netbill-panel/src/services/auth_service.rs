use anyhow::Context;
use chrono::{Duration, Utc};
use netbill_db::models::tenant::Tenant;
use netbill_db::models::user::{Role, User};
use netbill_db::repositories::entitlement_repo::EntitlementRepository;
use netbill_db::repositories::tenant_repo::TenantRepository;
use netbill_db::repositories::user_repo::UserRepository;
use netbill_db::utils::anyhow_is_unique_violation;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::redis_service::RedisService;
use crate::auth::password::PasswordHasher;
use crate::auth::{AuthError, Claims, TokenKind, TokenPair, TokenService};

const TRIAL_DAYS: i64 = 14;
const DEFAULT_PLAN: &str = "basic";
const RESERVED_SLUGS: [&str; 8] = ["www", "api", "admin", "app", "panel", "mail", "static", "super-admin"];

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub tenant_name: String,
    pub slug: String,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub plan_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshInput {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordInput {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub tenant: Tenant,
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Subdomain label: 3-63 chars of `[a-z0-9-]`, no edge hyphens.
pub fn validate_slug(raw: &str) -> Result<String, AuthError> {
    let slug = raw.trim().to_ascii_lowercase();
    let valid_chars = slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(3..=63).contains(&slug.len()) || !valid_chars || slug.starts_with('-') || slug.ends_with('-') {
        return Err(AuthError::InvalidInput(
            "slug must be 3-63 characters of a-z, 0-9 and inner hyphens".into(),
        ));
    }
    if RESERVED_SLUGS.contains(&slug.as_str()) {
        return Err(AuthError::InvalidInput(format!("slug '{}' is reserved", slug)));
    }
    Ok(slug)
}

pub fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(email),
        _ => Err(AuthError::InvalidInput("invalid email address".into())),
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    tenants: TenantRepository,
    entitlements: EntitlementRepository,
    tokens: TokenService,
    hasher: PasswordHasher,
    redis: RedisService,
}

impl AuthService {
    pub fn new(
        users: UserRepository,
        tenants: TenantRepository,
        entitlements: EntitlementRepository,
        tokens: TokenService,
        hasher: PasswordHasher,
        redis: RedisService,
    ) -> Self {
        Self {
            users,
            tenants,
            entitlements,
            tokens,
            hasher,
            redis,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Argon2 is CPU bound; keep it off the async workers.
    async fn hash(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    async fn verify(&self, password: String, hash: String) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    /// Creates a tenant and its owner in one transaction.
    pub async fn register(&self, input: RegisterInput) -> Result<Registration, AuthError> {
        let slug = validate_slug(&input.slug)?;
        let email = normalize_email(&input.email)?;
        if input.tenant_name.trim().is_empty() || input.name.trim().is_empty() {
            return Err(AuthError::InvalidInput("tenant_name and name are required".into()));
        }
        if self.tenants.slug_exists(&slug).await? {
            return Err(AuthError::SlugTaken);
        }
        let password_hash = self.hash(input.password).await?;

        let plan_code = input.plan_code.as_deref().unwrap_or(DEFAULT_PLAN);
        let plan = self.entitlements.get_plan_by_code(plan_code).await?;
        let plan_id = match plan {
            Some(p) if p.is_active => Some(p.id),
            Some(_) => return Err(AuthError::InvalidInput(format!("plan '{}' is not available", plan_code))),
            None if input.plan_code.is_some() => {
                return Err(AuthError::InvalidInput(format!("unknown plan '{}'", plan_code)));
            }
            None => {
                warn!("Default plan '{}' missing; tenant {} starts without a plan", DEFAULT_PLAN, slug);
                None
            }
        };

        let mut tx = self
            .users
            .pool()
            .begin()
            .await
            .context("Failed to open registration transaction")?;
        let trial_ends_at = Utc::now() + Duration::days(TRIAL_DAYS);
        let tenant = match self
            .tenants
            .create_tx(&mut tx, &slug, input.tenant_name.trim(), plan_id, Some(trial_ends_at))
            .await
        {
            Ok(t) => t,
            Err(e) if anyhow_is_unique_violation(&e) => return Err(AuthError::SlugTaken),
            Err(e) => return Err(e.into()),
        };
        let user = match self
            .users
            .create_tx(&mut tx, tenant.id, Role::Owner, &email, input.name.trim(), &password_hash)
            .await
        {
            Ok(u) => u,
            Err(e) if anyhow_is_unique_violation(&e) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        };
        tx.commit().await.context("Failed to commit registration")?;

        let tokens = self.tokens.issue_pair(&user)?;
        info!("🎉 Tenant {} registered (owner {})", tenant.slug, user.email);
        Ok(Registration { tenant, user, tokens })
    }

    /// `tenant_id` is `None` for the super-admin pool.
    pub async fn login(&self, tenant_id: Option<Uuid>, input: LoginInput) -> Result<Session, AuthError> {
        let email = input.email.trim().to_ascii_lowercase();
        let user = self
            .users
            .find_by_email(tenant_id, &email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !self.verify(input.password, user.password_hash.clone()).await? {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active() {
            return Err(AuthError::UserDisabled);
        }

        if let Err(e) = self.users.touch_last_login(user.id).await {
            warn!("Failed to record last login for {}: {:#}", user.email, e);
        }
        let tokens = self.tokens.issue_pair(&user)?;
        info!("User {} logged in", user.email);
        Ok(Session { user, tokens })
    }

    /// Rotates the refresh token; the presented one is revoked until it would expire.
    pub async fn refresh(&self, input: RefreshInput) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.decode(&input.refresh_token, TokenKind::Refresh)?;
        if self.redis.is_refresh_revoked(&claims.jti.to_string()).await? {
            return Err(AuthError::TokenRevoked);
        }
        let user = self
            .users
            .get_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        if !user.is_active() {
            return Err(AuthError::UserDisabled);
        }

        self.revoke(&claims).await?;
        self.tokens.issue_pair(&user)
    }

    /// Idempotent; an expired or malformed token has nothing left to revoke.
    pub async fn logout(&self, input: RefreshInput) -> Result<(), AuthError> {
        match self.tokens.decode(&input.refresh_token, TokenKind::Refresh) {
            Ok(claims) => self.revoke(&claims).await,
            Err(AuthError::TokenExpired | AuthError::TokenInvalid) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn revoke(&self, claims: &Claims) -> Result<(), AuthError> {
        let ttl = claims.remaining_secs(Utc::now().timestamp()).max(1);
        self.redis.revoke_refresh(&claims.jti.to_string(), ttl).await?;
        Ok(())
    }

    pub async fn me(&self, claims: &Claims) -> Result<User, AuthError> {
        self.users
            .get_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)
    }

    pub async fn change_password(&self, claims: &Claims, input: ChangePasswordInput) -> Result<(), AuthError> {
        let user = self.me(claims).await?;
        if !self.verify(input.current_password, user.password_hash.clone()).await? {
            return Err(AuthError::InvalidCredentials);
        }
        let hash = self.hash(input.new_password).await?;
        self.users.update_password(user.id, &hash).await?;
        info!("Password changed for {}", user.email);
        Ok(())
    }

    pub async fn create_super_admin(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        let hash = self.hash(password.to_string()).await?;
        match self.users.create(None, Role::SuperAdmin, &email, "Super Admin", &hash).await {
            Ok(user) => Ok(user),
            Err(e) if anyhow_is_unique_violation(&e) => Err(AuthError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    /// Resets a super-admin password.
    pub async fn reset_super_admin_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let user = self
            .users
            .find_by_email(None, email.trim())
            .await?
            .ok_or_else(|| AuthError::InvalidInput(format!("no super-admin with email {}", email)))?;
        let hash = self.hash(password.to_string()).await?;
        self.users.update_password(user.id, &hash).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_dns_labels() {
        assert_eq!(validate_slug(" NetJaya ").unwrap(), "netjaya");
        assert_eq!(validate_slug("isp-01").unwrap(), "isp-01");
        for bad in ["ab", "-isp", "isp-", "isp_01", "isp.net", "www", "api"] {
            assert!(validate_slug(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email(" Owner@Example.COM ").unwrap(), "owner@example.com");
        assert!(normalize_email("owner").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("owner@localhost").is_err());
    }
}
