//! HTTP access fabric. Layers are wired in `routes.rs`, outermost first:
//! request id, panic recovery, security headers, CORS, input validation,
//! request log, audit, rate limit, tenant; then per-route JWT auth, the
//! RBAC/feature gate and CSRF.

pub mod audit;
pub mod auth;
pub mod cors;
pub mod csrf;
pub mod gate;
pub mod input_validation;
pub mod panic;
pub mod rate_limit;
pub mod request_id;
pub mod request_log;
pub mod security_headers;
pub mod tenant;

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use uuid::Uuid;

pub const API_PREFIX: &str = "/api/v1";
pub const RADIUS_PREFIX: &str = "/api/v1/radius/";
pub const SUPER_ADMIN_PREFIX: &str = "/api/v1/super-admin/";
pub const AUTH_PREFIX: &str = "/api/v1/auth/";

/// Tenant resolved for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub id: Uuid,
    pub slug: String,
}

/// Paths that never count against limits or carry a tenant.
pub fn is_probe_path(path: &str) -> bool {
    matches!(path, "/health" | "/version")
}

/// Best-effort client address: proxy headers first, then the socket peer.
pub fn client_ip(req: &Request) -> Option<String> {
    forwarded_ip(req.headers()).or_else(|| {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

pub fn user_agent(req: &Request) -> Option<String> {
    req.headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(512).collect())
}
