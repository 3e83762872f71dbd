//! Fixed-window request limiting keyed by caller identity and path.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use netbill_shared::api::ErrorBody;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::{RADIUS_PREFIX, AUTH_PREFIX, client_ip, is_probe_path};
use crate::auth::token::bearer_token;
use crate::auth::{Claims, TokenKind, TokenService};
use crate::config::{RateLimitPolicy, RateLimitRule};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateHit {
    /// Requests seen in the current window, including this one.
    pub count: u64,
    pub reset_secs: u64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, key: &str, window_secs: u64) -> Result<RateHit>;
}

pub fn rule_for(policy: &RateLimitPolicy, method: &Method, path: &str) -> RateLimitRule {
    if path.starts_with(AUTH_PREFIX) {
        policy.auth
    } else if path.starts_with(RADIUS_PREFIX) {
        policy.radius
    } else if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
        policy.read
    } else {
        policy.write
    }
}

/// `tenant:<id>`, else `user:<id>`, else a truncated hash of the address.
pub fn identity(claims: Option<&Claims>, ip: Option<&str>) -> String {
    if let Some(claims) = claims {
        return match claims.tenant() {
            Some(tenant) => format!("tenant:{}", tenant),
            None => format!("user:{}", claims.user_id),
        };
    }
    let digest = Sha256::digest(ip.unwrap_or("unknown").as_bytes());
    format!("ip:{}", &hex::encode(digest)[..16])
}

pub fn bucket_key(identity: &str, path: &str) -> String {
    format!("rate_limit:{}:{}", identity, path)
}

fn claims_from(tokens: &TokenService, headers: &HeaderMap) -> Option<Claims> {
    let raw = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    bearer_token(raw).and_then(|t| tokens.decode(t, TokenKind::Access).ok())
}

fn set_headers(headers: &mut HeaderMap, rule: RateLimitRule, hit: RateHit) {
    let remaining = rule.limit.saturating_sub(hit.count);
    headers.insert("x-ratelimit-limit", HeaderValue::from(rule.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(hit.reset_secs));
}

/// Middleware state: the counter store, the bucket policy and the token
/// decoder used to identify callers before auth has run.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
    tokens: TokenService,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        policy: RateLimitPolicy,
        tokens: TokenService,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            policy,
            tokens,
            metrics,
        }
    }
}

pub async fn limit(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_probe_path(&path) {
        return next.run(req).await;
    }

    let rule = rule_for(&limiter.policy, req.method(), &path);
    let claims = claims_from(&limiter.tokens, req.headers());
    let ip = client_ip(&req);
    let key = bucket_key(&identity(claims.as_ref(), ip.as_deref()), &path);

    let hit = match limiter.store.hit(&key, rule.window_secs).await {
        Ok(hit) => hit,
        Err(e) => {
            warn!("Rate limit store unavailable, admitting request: {:#}", e);
            return next.run(req).await;
        }
    };

    if hit.count > rule.limit {
        Metrics::incr(&limiter.metrics.rate_limited);
        let body = ErrorBody {
            error: "too_many_requests".to_string(),
            message: Some(format!("Rate limit exceeded, retry in {} seconds", hit.reset_secs)),
            features: Vec::new(),
        };
        let mut res = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        set_headers(res.headers_mut(), rule, hit);
        res.headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(hit.reset_secs.max(1)));
        return res;
    }

    let mut res = next.run(req).await;
    set_headers(res.headers_mut(), rule, hit);
    res
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Counts without expiry; `fail` simulates an unreachable store.
    #[derive(Default)]
    pub struct MemoryRateLimitStore {
        pub counts: Mutex<HashMap<String, u64>>,
        pub fail: bool,
    }

    #[async_trait]
    impl RateLimitStore for MemoryRateLimitStore {
        async fn hit(&self, key: &str, window_secs: u64) -> Result<RateHit> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(key.to_string()).or_default();
            *count += 1;
            Ok(RateHit {
                count: *count,
                reset_secs: window_secs,
            })
        }
    }

    pub fn shared() -> Arc<MemoryRateLimitStore> {
        Arc::new(MemoryRateLimitStore::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use chrono::Utc;
    use netbill_db::models::user::Role;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn claims(tenant_id: Uuid) -> Claims {
        Claims {
            user_id: Uuid::new_v4(),
            tenant_id,
            role: Role::Admin,
            email: "a@isp.test".into(),
            kind: TokenKind::Access,
            jti: Uuid::new_v4(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 60,
        }
    }

    #[test]
    fn identity_prefers_tenant_then_user_then_ip() {
        let tenant = Uuid::new_v4();
        assert_eq!(identity(Some(&claims(tenant)), Some("1.2.3.4")), format!("tenant:{}", tenant));

        let platform = claims(Uuid::nil());
        assert_eq!(identity(Some(&platform), None), format!("user:{}", platform.user_id));

        let anon = identity(None, Some("1.2.3.4"));
        assert!(anon.starts_with("ip:"));
        assert_eq!(anon.len(), 3 + 16);
        assert_ne!(anon, identity(None, Some("1.2.3.5")));
    }

    #[test]
    fn policy_picks_bucket_by_path_and_method() {
        let policy = RateLimitPolicy::default();
        assert_eq!(rule_for(&policy, &Method::POST, "/api/v1/auth/login"), policy.auth);
        assert_eq!(rule_for(&policy, &Method::POST, "/api/v1/radius/auth"), policy.radius);
        assert_eq!(rule_for(&policy, &Method::GET, "/api/v1/clients"), policy.read);
        assert_eq!(rule_for(&policy, &Method::DELETE, "/api/v1/clients/1"), policy.write);
    }

    #[tokio::test]
    async fn memory_store_counts_per_key() {
        let store = memory::shared();
        let key = bucket_key("ip:abc", "/api/v1/clients");
        assert_eq!(key, "rate_limit:ip:abc:/api/v1/clients");
        store.hit(&key, 60).await.unwrap();
        let second = store.hit(&key, 60).await.unwrap();
        assert_eq!(second, RateHit { count: 2, reset_secs: 60 });
    }

    fn app(store: Arc<dyn RateLimitStore>, metrics: Arc<Metrics>) -> Router {
        let policy = RateLimitPolicy {
            read: RateLimitRule { limit: 3, window_secs: 60 },
            ..RateLimitPolicy::default()
        };
        let limiter = RateLimiter::new(store, policy, TokenService::new("rate-limit-test-secret", 60, 120), metrics);
        Router::new()
            .route("/api/v1/clients", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, limit))
    }

    fn clients_request() -> Request {
        Request::builder()
            .uri("/api/v1/clients")
            .header("x-forwarded-for", "10.0.0.7")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_the_request_after_the_limit() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let app = app(memory::shared(), metrics.clone());

        for served in 1..=3u64 {
            let res = app.clone().oneshot(clients_request()).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(res.headers()["x-ratelimit-limit"], "3");
            assert_eq!(res.headers()["x-ratelimit-remaining"], (3 - served).to_string().as_str());
        }

        let res = app.oneshot(clients_request()).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()["x-ratelimit-limit"], "3");
        assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(res.headers()["x-ratelimit-reset"], "60");
        assert_eq!(res.headers()[header::RETRY_AFTER], "60");
        assert_eq!(metrics.rate_limited.get(), 1);

        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "too_many_requests");
    }

    #[tokio::test]
    async fn unreachable_store_admits_requests() {
        let store = Arc::new(memory::MemoryRateLimitStore {
            fail: true,
            ..Default::default()
        });
        let app = app(store, Arc::new(Metrics::new().unwrap()));

        for _ in 0..5 {
            let res = app.clone().oneshot(clients_request()).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert!(res.headers().get("x-ratelimit-limit").is_none());
        }
    }

    #[test]
    fn headers_never_go_negative() {
        let mut headers = HeaderMap::new();
        let rule = RateLimitRule { limit: 2, window_secs: 60 };
        set_headers(&mut headers, rule, RateHit { count: 5, reset_secs: 12 });
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "12");
    }
}
