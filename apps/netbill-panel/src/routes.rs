use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::AppState;
use crate::error::AppError;
use crate::features::{
    FEATURE_BILLING_BASIC, FEATURE_CLIENT_MANAGEMENT, FEATURE_COLLECTOR, FEATURE_NETWORK_MAP, FEATURE_RADIUS,
    FEATURE_ROUTER_SYNC, FEATURE_WA_GATEWAY,
};
use crate::handlers;
use crate::middleware::cors::{self, CorsPolicy};
use crate::middleware::csrf::{self, CsrfGuard};
use crate::middleware::gate::{self, Gate};
use crate::middleware::input_validation::{self, MAX_JSON_BYTES, MAX_MULTIPART_BYTES};
use crate::middleware::{
    API_PREFIX, audit, auth, panic, rate_limit, request_id, request_log, security_headers, tenant,
};
use crate::rbac::Capability::{self, *};

/// CSRF runs innermost, after JWT auth and the gate have answered.
fn with_csrf<S>(router: Router<S>, guard: CsrfGuard) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(from_fn_with_state(guard, csrf::protect))
}

fn csrf_guard(state: &AppState) -> CsrfGuard {
    CsrfGuard::new(state.config.is_production())
}

/// Attaches the RBAC/feature gate, then CSRF behind it, to every route of `router`.
fn gated(
    state: &AppState,
    router: Router<AppState>,
    capabilities: &'static [Capability],
    features: &'static [&'static str],
) -> Router<AppState> {
    with_csrf(router, csrf_guard(state))
        .route_layer(from_fn_with_state(Gate::new(state, capabilities, features), gate::enforce))
}

fn public_api() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/radius/auth", post(handlers::radius::authenticate))
        .route("/radius/accounting", post(handlers::radius::accounting))
}

fn client_routes(state: &AppState) -> Router<AppState> {
    use handlers::clients::*;
    const FEATURES: &[&str] = &[FEATURE_CLIENT_MANAGEMENT];

    let read = Router::new()
        .route("/clients", get(list_clients))
        .route("/clients/{id}", get(get_client))
        .route("/packages", get(list_packages));
    let write = Router::new()
        .route("/clients", post(create_client))
        .route("/clients/{id}", put(update_client).delete(delete_client))
        .route("/clients/{id}/status", post(change_status))
        .route("/packages", post(create_package))
        .route("/tempo-templates", post(create_tempo_template))
        .route("/groups", post(create_group));

    gated(state, read, &[ClientsRead], FEATURES).merge(gated(state, write, &[ClientsWrite], FEATURES))
}

fn billing_routes(state: &AppState) -> Router<AppState> {
    use handlers::billing::*;
    const FEATURES: &[&str] = &[FEATURE_BILLING_BASIC];

    let read = Router::new()
        .route("/invoices", get(list_invoices))
        .route("/invoices/{id}", get(get_invoice));
    let reports = Router::new()
        .route("/reports/payment-matrix", get(payment_matrix))
        .route("/reports/monthly-summary", get(monthly_summary));
    let write = Router::new()
        .route("/invoices", post(create_invoice))
        .route("/invoices/{id}/cancel", post(cancel_invoice));
    let payments = Router::new().route("/payments", post(record_payment));

    gated(state, read, &[BillingRead], FEATURES)
        .merge(gated(state, reports, &[ReportsRead], FEATURES))
        .merge(gated(state, write, &[BillingWrite], FEATURES))
        .merge(gated(state, payments, &[PaymentsWrite], FEATURES))
}

fn router_routes(state: &AppState) -> Router<AppState> {
    use handlers::{pppoe, routers};
    const FEATURES: &[&str] = &[FEATURE_ROUTER_SYNC];

    let read = Router::new()
        .route("/routers", get(routers::list_routers))
        .route("/routers/{id}", get(routers::get_router))
        .route("/routers/{id}/sessions", get(routers::list_sessions))
        .route("/profiles", get(routers::list_profiles));
    let write = Router::new()
        .route("/routers", post(routers::create_router))
        .route("/routers/{id}/test", post(routers::test_connection))
        .route("/routers/{id}/sessions/{session_id}", delete(routers::disconnect_session))
        .route("/profiles", post(routers::create_profile));
    let secrets_read = Router::new()
        .route("/pppoe", get(pppoe::list_secrets))
        .route("/pppoe/{id}", get(pppoe::get_secret));
    let secrets_write = Router::new()
        .route("/pppoe", post(pppoe::create_secret))
        .route("/pppoe/{id}", put(pppoe::update_secret).delete(pppoe::delete_secret))
        .route("/pppoe/{id}/toggle", post(pppoe::toggle_secret))
        .route("/pppoe/{id}/sync", post(pppoe::sync_secret));

    gated(state, read, &[RoutersRead], FEATURES)
        .merge(gated(state, write, &[RoutersWrite], FEATURES))
        .merge(gated(state, secrets_read, &[PppoeRead], FEATURES))
        .merge(gated(state, secrets_write, &[PppoeWrite], FEATURES))
}

fn campaign_routes(state: &AppState) -> Router<AppState> {
    use handlers::{campaigns, wa_logs};
    const FEATURES: &[&str] = &[FEATURE_WA_GATEWAY];

    let read = Router::new()
        .route("/campaigns", get(campaigns::list_campaigns))
        .route("/campaigns/{id}", get(campaigns::get_campaign))
        .route("/campaigns/{id}/recipients", get(campaigns::list_recipients))
        .route("/wa-logs", get(wa_logs::list_logs));
    let write = Router::new()
        .route("/campaigns", post(campaigns::create_campaign))
        .route("/campaigns/{id}/retry", post(campaigns::retry_failed))
        .route("/campaigns/{id}/cancel", post(campaigns::cancel_campaign));

    gated(state, read, &[CampaignsRead], FEATURES).merge(gated(state, write, &[CampaignsWrite], FEATURES))
}

fn collector_routes(state: &AppState) -> Router<AppState> {
    use handlers::collector::*;
    const FEATURES: &[&str] = &[FEATURE_COLLECTOR];

    let read = Router::new().route("/collector/visits", get(list_visits));
    let visit = Router::new().route("/collector/visits", post(visit_success));
    let setoran = Router::new().route("/collector/setoran", post(confirm_setoran));
    let deposit = Router::new().route("/collector/deposit", post(confirm_deposit));

    gated(state, read, &[BillingRead], FEATURES)
        .merge(gated(state, visit, &[CollectorVisit], FEATURES))
        .merge(gated(state, setoran, &[CollectorConfirm], FEATURES))
        .merge(gated(state, deposit, &[FinanceConfirm], FEATURES))
}

fn network_routes(state: &AppState) -> Router<AppState> {
    use handlers::{outages, radius};
    const FEATURES: &[&str] = &[FEATURE_NETWORK_MAP];

    let read = Router::new().route("/outages", get(outages::list_outages));
    let write = Router::new()
        .route("/topology/odc", post(outages::create_odc))
        .route("/topology/odp", post(outages::create_odp))
        .route("/topology/links", post(outages::create_link))
        .route("/outages", post(outages::open_outage))
        .route("/outages/{id}/resolve", post(outages::resolve_outage));
    let sessions = Router::new().route("/radius-sessions", get(radius::open_sessions));

    gated(state, read, &[TopologyRead], FEATURES)
        .merge(gated(state, write, &[TopologyWrite], FEATURES))
        .merge(gated(state, sessions, &[RadiusRead], &[FEATURE_RADIUS]))
}

fn super_admin_routes(state: &AppState) -> Router<AppState> {
    use handlers::super_admin::*;

    let routes = Router::new()
        .route("/super-admin/tenants", get(list_tenants))
        .route("/super-admin/tenants/{id}/status", put(set_tenant_status))
        .route("/super-admin/tenants/{id}/entitlements", get(tenant_entitlements))
        .route("/super-admin/tenants/{id}/addons", post(attach_addon))
        .route("/super-admin/toggles", put(upsert_toggle).delete(delete_toggle));
    gated(state, routes, &[PlatformAdmin], &[])
}

fn protected_api(state: &AppState) -> Router<AppState> {
    let account = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/change-password", post(handlers::auth::change_password));

    with_csrf(account, csrf_guard(state))
        .merge(client_routes(state))
        .merge(billing_routes(state))
        .merge(router_routes(state))
        .merge(campaign_routes(state))
        .merge(collector_routes(state))
        .merge(network_routes(state))
        .merge(super_admin_routes(state))
        .route_layer(from_fn_with_state(state.clone(), auth::require_auth))
}

async fn not_found() -> impl IntoResponse {
    AppError::NotFound("route not found".into())
}

/// Full application. Layers listed last run first on the way in.
pub fn build(state: AppState) -> Router {
    let cors_policy = CorsPolicy::new(
        state.config.cors_allowed_origins.clone(),
        state.config.cors_allow_credentials,
    );
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs);
    let api = public_api().merge(protected_api(&state));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/version", get(handlers::health::version))
        .route("/metrics", get(handlers::health::metrics))
        .nest(API_PREFIX, api)
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), tenant::resolve))
        .layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit::limit))
        .layer(from_fn_with_state(state.clone(), audit::record))
        .layer(from_fn_with_state(state.clone(), request_log::log))
        .layer(DefaultBodyLimit::max(MAX_JSON_BYTES as usize))
        .layer(RequestBodyLimitLayer::new(MAX_MULTIPART_BYTES as usize))
        .layer(from_fn(input_validation::validate))
        .layer(from_fn_with_state(cors_policy, cors::apply))
        .layer(from_fn(security_headers::apply))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CatchPanicLayer::custom(panic::recover))
        .layer(from_fn(request_id::inject))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::extract::Request;
    use axum::http::{StatusCode, header};
    use axum::middleware::Next;
    use axum::response::Response;
    use axum::{body::Body, routing::post};
    use tower::ServiceExt;

    use super::*;
    use crate::middleware::csrf::{CSRF_COOKIE, CSRF_HEADER};

    async fn bearer_required(req: Request, next: Next) -> Response {
        if req.headers().contains_key(header::AUTHORIZATION) {
            next.run(req).await
        } else {
            AppError::Unauthorized("missing bearer token".into()).into_response()
        }
    }

    fn app() -> Router {
        with_csrf(Router::new().route("/api/v1/clients", post(|| async { "created" })), CsrfGuard::new(false))
            .route_layer(from_fn(bearer_required))
    }

    fn create(bearer: bool, csrf: Option<&str>) -> Request {
        let mut req = Request::builder().method("POST").uri("/api/v1/clients");
        if bearer {
            req = req.header(header::AUTHORIZATION, "Bearer t");
        }
        if let Some(token) = csrf {
            req = req
                .header(header::COOKIE, format!("{}={}", CSRF_COOKIE, token))
                .header(CSRF_HEADER, token);
        }
        req.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_mutation_is_401_not_a_csrf_error() {
        let res = app().oneshot(create(false, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authenticated_mutation_still_needs_the_token() {
        let res = app().oneshot(create(true, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app().oneshot(create(true, Some("tok"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
