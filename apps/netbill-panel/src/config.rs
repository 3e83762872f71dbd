use anyhow::{Context, Result, bail};
use std::str::FromStr;

/// `<limit>/<window_secs>` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window_secs: u64,
}

impl FromStr for RateLimitRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (limit, window) = s
            .split_once('/')
            .with_context(|| format!("rate limit '{}' must look like <limit>/<window_secs>", s))?;
        let limit: u64 = limit.trim().parse().context("invalid rate limit count")?;
        let window_secs: u64 = window.trim().parse().context("invalid rate limit window")?;
        if limit == 0 || window_secs == 0 {
            bail!("rate limit '{}' must be non-zero", s);
        }
        Ok(Self { limit, window_secs })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub auth: RateLimitRule,
    pub read: RateLimitRule,
    pub write: RateLimitRule,
    pub radius: RateLimitRule,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            auth: RateLimitRule { limit: 10, window_secs: 60 },
            read: RateLimitRule { limit: 300, window_secs: 60 },
            write: RateLimitRule { limit: 60, window_secs: 60 },
            radius: RateLimitRule { limit: 120, window_secs: 60 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub queue_redis_url: String,
    pub master_encryption_key: String,
    pub jwt_secret: String,
    pub jwt_access_ttl_secs: i64,
    pub jwt_refresh_ttl_secs: i64,
    pub cors_allowed_origins: Vec<String>,
    pub cors_allow_credentials: bool,
    pub log_level: String,
    pub log_dir: String,
    pub host: String,
    pub port: u16,
    pub app_env: AppEnv,
    pub base_domain: Option<String>,
    pub wa_gateway_url: Option<String>,
    pub wa_gateway_token: Option<String>,
    pub worker_concurrency: usize,
    pub router_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub client_retention_days: i64,
    pub default_utc_offset_minutes: i32,
    pub rate_limits: RateLimitPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{} must be set", key));

        fn parsed<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            match value {
                Some(raw) => raw
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
                None => Ok(default),
            }
        }

        let redis_url = var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        let queue_redis_url = var("QUEUE_REDIS_URL").unwrap_or_else(|| redis_url.clone());

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters");
        }

        let cors_allowed_origins: Vec<String> = var("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let cors_allow_credentials = parsed(var("CORS_ALLOW_CREDENTIALS"), "CORS_ALLOW_CREDENTIALS", true)?;
        if cors_allow_credentials && cors_allowed_origins.iter().any(|o| o == "*") {
            bail!("CORS_ALLOWED_ORIGINS cannot contain '*' while CORS_ALLOW_CREDENTIALS is enabled");
        }

        let app_env = match var("APP_ENV").as_deref() {
            Some("production") | Some("prod") => AppEnv::Production,
            _ => AppEnv::Development,
        };

        let defaults = RateLimitPolicy::default();
        let rate_limits = RateLimitPolicy {
            auth: parsed(var("RATE_LIMIT_AUTH"), "RATE_LIMIT_AUTH", defaults.auth)?,
            read: parsed(var("RATE_LIMIT_READ"), "RATE_LIMIT_READ", defaults.read)?,
            write: parsed(var("RATE_LIMIT_WRITE"), "RATE_LIMIT_WRITE", defaults.write)?,
            radius: parsed(var("RATE_LIMIT_RADIUS"), "RATE_LIMIT_RADIUS", defaults.radius)?,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parsed(var("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 20)?,
            redis_url,
            queue_redis_url,
            master_encryption_key: required("MASTER_ENCRYPTION_KEY")?,
            jwt_secret,
            jwt_access_ttl_secs: parsed(var("JWT_ACCESS_TTL_SECS"), "JWT_ACCESS_TTL_SECS", 900)?,
            jwt_refresh_ttl_secs: parsed(var("JWT_REFRESH_TTL_SECS"), "JWT_REFRESH_TTL_SECS", 604_800)?,
            cors_allowed_origins,
            cors_allow_credentials,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_dir: var("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            host: var("PANEL_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(var("PANEL_PORT"), "PANEL_PORT", 8080)?,
            app_env,
            base_domain: var("BASE_DOMAIN").map(|d| d.to_ascii_lowercase()),
            wa_gateway_url: var("WA_GATEWAY_URL").map(|u| u.trim_end_matches('/').to_string()),
            wa_gateway_token: var("WA_GATEWAY_TOKEN"),
            worker_concurrency: parsed(var("WORKER_CONCURRENCY"), "WORKER_CONCURRENCY", 4usize)?.max(1),
            router_timeout_secs: parsed(var("ROUTER_TIMEOUT_SECS"), "ROUTER_TIMEOUT_SECS", 10)?,
            request_timeout_secs: parsed(var("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS", 30)?,
            client_retention_days: parsed(var("CLIENT_RETENTION_DAYS"), "CLIENT_RETENTION_DAYS", 90)?,
            default_utc_offset_minutes: parsed(var("DEFAULT_UTC_OFFSET_MINUTES"), "DEFAULT_UTC_OFFSET_MINUTES", 420)?,
            rate_limits,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    /// Default filter when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> String {
        format!(
            "netbill_panel={},netbill_db={},axum=info,tower_http=info,sqlx=warn",
            self.log_level, self.log_level
        )
    }
}
