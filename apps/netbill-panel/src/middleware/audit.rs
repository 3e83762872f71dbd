use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use netbill_db::models::audit::NewAuditLog;

use super::request_id::RequestId;
use super::{TenantContext, client_ip, user_agent};
use crate::AppState;
use crate::auth::Claims;

/// Queues one audit record after the response is produced. Identity comes
/// from the response extensions set by the tenant and auth layers.
pub async fn record(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let ip = client_ip(&req);
    let user_agent = user_agent(&req);

    let res = next.run(req).await;

    let claims = res.extensions().get::<Claims>();
    let tenant_id = res
        .extensions()
        .get::<TenantContext>()
        .map(|t| t.id)
        .or_else(|| claims.and_then(Claims::tenant));
    state.audit.record(NewAuditLog {
        request_id,
        tenant_id,
        user_id: claims.map(|c| c.user_id),
        method,
        path,
        status: i32::from(res.status().as_u16()),
        duration_ms: started.elapsed().as_millis() as i64,
        ip,
        user_agent,
    });
    res
}
