//! Request size and shape checks that run before any body is read.

use axum::extract::Request;
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

pub const MAX_GENERAL_BYTES: u64 = 1024 * 1024;
pub const MAX_JSON_BYTES: u64 = 2 * 1024 * 1024;
pub const MAX_MULTIPART_BYTES: u64 = 10 * 1024 * 1024;

const MAX_QUERY_KEY_LEN: usize = 100;
const MAX_QUERY_VALUE_LEN: usize = 1000;

const INJECTION_MARKERS: &[&str] = &[
    "';", "--", "/*", "*/", "xp_", "sp_", "<script", "javascript:", "onerror=", "onload=",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Multipart,
    Form,
    Other,
}

fn body_kind(content_type: &str) -> BodyKind {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/json" => BodyKind::Json,
        "multipart/form-data" => BodyKind::Multipart,
        "application/x-www-form-urlencoded" => BodyKind::Form,
        _ => BodyKind::Other,
    }
}

fn cap_for(kind: BodyKind) -> u64 {
    match kind {
        BodyKind::Json => MAX_JSON_BYTES,
        BodyKind::Multipart => MAX_MULTIPART_BYTES,
        BodyKind::Form | BodyKind::Other => MAX_GENERAL_BYTES,
    }
}

fn is_state_changing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Rejects oversized query parts and common injection fingerprints.
pub fn scan_query(query: &str) -> Result<(), AppError> {
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(&raw_key.replace('+', " "))
            .map(|k| k.into_owned())
            .unwrap_or_else(|_| raw_key.to_string());
        let value = urlencoding::decode(&raw_value.replace('+', " "))
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw_value.to_string());

        if key.chars().count() > MAX_QUERY_KEY_LEN {
            return Err(AppError::InputInvalid("query parameter name too long".into()));
        }
        if value.chars().count() > MAX_QUERY_VALUE_LEN {
            return Err(AppError::InputInvalid(format!("query parameter '{}' too long", key)));
        }
        let lowered = format!("{}={}", key, value).to_ascii_lowercase();
        if INJECTION_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Err(AppError::InputInvalid(format!(
                "query parameter '{}' contains forbidden characters",
                key
            )));
        }
    }
    Ok(())
}

pub async fn validate(req: Request, next: Next) -> Response {
    if let Err(e) = check(&req) {
        return e.into_response();
    }
    next.run(req).await
}

fn check(req: &Request) -> Result<(), AppError> {
    if let Some(query) = req.uri().query() {
        scan_query(query)?;
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let kind = content_type.map(body_kind).unwrap_or(BodyKind::Other);

    let length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if length.is_some_and(|len| len > cap_for(kind)) {
        return Err(AppError::PayloadTooLarge);
    }

    if is_state_changing(req.method()) {
        let has_body = length.is_some_and(|len| len > 0) || req.headers().contains_key(header::TRANSFER_ENCODING);
        match content_type {
            Some(ct) if kind == BodyKind::Other => {
                return Err(AppError::UnsupportedMediaType(ct.to_string()));
            }
            None if has_body => {
                return Err(AppError::UnsupportedMediaType("missing content type".into()));
            }
            _ => {}
        }
    }
    Ok(())
}
