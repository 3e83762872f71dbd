//! Double-submit cookie protection for state-changing requests.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::debug;

use super::{RADIUS_PREFIX, is_probe_path};
use crate::error::AppError;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

const EXEMPT: &[&str] = &[
    "/api/v1/auth/login",
    "/api/v1/auth/register",
    "/api/v1/auth/refresh",
    "/api/v1/auth/logout",
];

pub fn is_exempt(path: &str) -> bool {
    is_probe_path(path) || path.starts_with(RADIUS_PREFIX) || EXEMPT.contains(&path)
}

pub fn mint_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn same(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn verify(cookie: Option<&str>, header: Option<&str>) -> Result<(), AppError> {
    match (cookie, header) {
        (Some(c), Some(h)) if !c.is_empty() && !h.is_empty() => {
            if same(c, h) {
                Ok(())
            } else {
                Err(AppError::CsrfMismatch)
            }
        }
        _ => Err(AppError::CsrfMissing),
    }
}

fn csrf_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .path("/")
        .same_site(SameSite::Lax)
        .http_only(false)
        .secure(secure)
        .max_age(time::Duration::hours(1))
        .build()
}

/// Layer state. The cookie is `Secure` in production.
#[derive(Debug, Clone, Copy)]
pub struct CsrfGuard {
    secure_cookie: bool,
}

impl CsrfGuard {
    pub fn new(secure_cookie: bool) -> Self {
        Self { secure_cookie }
    }
}

pub async fn protect(State(guard): State<CsrfGuard>, jar: CookieJar, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let existing = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());

    if matches!(method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE) && !is_exempt(&path) {
        let header = req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok());
        if let Err(e) = verify(existing.as_deref(), header) {
            debug!("CSRF check failed for {} {}: {}", method, path, e);
            return e.into_response();
        }
        return next.run(req).await;
    }

    let mut res = next.run(req).await;
    if method == Method::GET && existing.is_none() {
        let token = mint_token();
        let cookie = csrf_cookie(token.clone(), guard.secure_cookie);
        if let (Ok(set), Ok(echo)) = (
            HeaderValue::from_str(&cookie.to_string()),
            HeaderValue::from_str(&token),
        ) {
            res.headers_mut().append(header::SET_COOKIE, set);
            res.headers_mut().insert(CSRF_HEADER, echo);
        }
    }
    res
}
