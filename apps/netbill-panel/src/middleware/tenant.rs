//! Resolves the tenant from `X-Tenant-Slug` or the request subdomain.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::{API_PREFIX, AUTH_PREFIX, RADIUS_PREFIX, SUPER_ADMIN_PREFIX, TenantContext};
use crate::AppState;
use crate::error::AppError;

const SLUG_HEADER: &str = "x-tenant-slug";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantRequirement {
    /// No tenant lookup at all.
    Skip,
    /// Resolved when the caller names one.
    Optional,
    Required,
}

pub fn requirement(path: &str) -> TenantRequirement {
    if !path.starts_with(API_PREFIX)
        || path.starts_with(RADIUS_PREFIX)
        || path.starts_with(SUPER_ADMIN_PREFIX)
        || path == "/api/v1/auth/register"
    {
        TenantRequirement::Skip
    } else if path.starts_with(AUTH_PREFIX) {
        TenantRequirement::Optional
    } else {
        TenantRequirement::Required
    }
}

/// Header wins; otherwise the first label of a host under `base_domain`.
/// Without a configured base domain any host with three or more labels
/// contributes its first label.
pub fn extract_slug(headers: &HeaderMap, base_domain: Option<&str>) -> Option<String> {
    if let Some(slug) = headers
        .get(SLUG_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
    {
        return Some(slug);
    }

    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok())?;
    let host = host.split(':').next().unwrap_or(host).trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }

    let label = match base_domain {
        Some(base) => host.strip_suffix(base)?.strip_suffix('.')?.to_string(),
        None => {
            let labels: Vec<&str> = host.split('.').collect();
            if labels.len() < 3 {
                return None;
            }
            labels[0].to_string()
        }
    };
    let first = label.split('.').next().unwrap_or_default();
    (!first.is_empty() && first != "www").then(|| first.to_string())
}

pub async fn resolve(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let requirement = requirement(req.uri().path());
    if requirement == TenantRequirement::Skip {
        return next.run(req).await;
    }

    let Some(slug) = extract_slug(req.headers(), state.config.base_domain.as_deref()) else {
        if requirement == TenantRequirement::Optional {
            return next.run(req).await;
        }
        return AppError::NotFound("tenant not specified".into()).into_response();
    };

    let tenant = match state.tenants.get_by_slug(&slug).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => return AppError::NotFound(format!("tenant '{}' not found", slug)).into_response(),
        Err(e) => return AppError::Internal(e).into_response(),
    };
    if !tenant.is_active() {
        debug!("Rejected request for {} tenant {}", tenant.status, tenant.slug);
        return AppError::Forbidden(format!("tenant is {}", tenant.status)).into_response();
    }

    let ctx = TenantContext {
        id: tenant.id,
        slug: tenant.slug,
    };
    req.extensions_mut().insert(ctx.clone());
    let mut res = next.run(req).await;
    res.extensions_mut().insert(ctx);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn header_overrides_subdomain() {
        let h = headers(&[("x-tenant-slug", "Acme"), ("host", "other.netbill.test")]);
        assert_eq!(extract_slug(&h, Some("netbill.test")).as_deref(), Some("acme"));
    }

    #[test]
    fn subdomain_under_base_domain() {
        let h = headers(&[("host", "acme.netbill.test:8080")]);
        assert_eq!(extract_slug(&h, Some("netbill.test")).as_deref(), Some("acme"));
        assert_eq!(extract_slug(&headers(&[("host", "netbill.test")]), Some("netbill.test")), None);
        assert_eq!(extract_slug(&headers(&[("host", "acme.elsewhere.test")]), Some("netbill.test")), None);
    }

    #[test]
    fn bare_hosts_and_addresses_have_no_slug() {
        assert_eq!(extract_slug(&headers(&[("host", "localhost:8080")]), None), None);
        assert_eq!(extract_slug(&headers(&[("host", "10.0.0.1")]), None), None);
        assert_eq!(extract_slug(&headers(&[("host", "www.netbill.test")]), None), None);
        assert_eq!(extract_slug(&headers(&[("host", "acme.netbill.test")]), None).as_deref(), Some("acme"));
    }

    #[test]
    fn radius_super_admin_and_register_skip_lookup() {
        assert_eq!(requirement("/api/v1/radius/auth"), TenantRequirement::Skip);
        assert_eq!(requirement("/api/v1/super-admin/tenants"), TenantRequirement::Skip);
        assert_eq!(requirement("/api/v1/auth/register"), TenantRequirement::Skip);
        assert_eq!(requirement("/health"), TenantRequirement::Skip);
        assert_eq!(requirement("/api/v1/auth/login"), TenantRequirement::Optional);
        assert_eq!(requirement("/api/v1/clients"), TenantRequirement::Required);
    }
}
