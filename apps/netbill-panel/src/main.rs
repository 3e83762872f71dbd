mod auth;
mod cli;
mod config;
mod crypto;
mod error;
mod features;
mod handlers;
mod metrics;
mod middleware;
mod mikrotik;
mod rbac;
mod routes;
mod services;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netbill_db::repositories::{
    audit_repo::AuditRepository, campaign_repo::CampaignRepository, client_repo::ClientRepository,
    collector_repo::CollectorRepository, entitlement_repo::EntitlementRepository, invoice_repo::InvoiceRepository,
    payment_repo::PaymentRepository, pppoe_repo::PppoeRepository, radius_repo::RadiusRepository,
    router_repo::RouterRepository, tenant_repo::TenantRepository, topology_repo::TopologyRepository,
    user_repo::UserRepository, wa_log_repo::WaLogRepository,
};

use auth::password::PasswordHasher;
use auth::token::TokenService;
use config::Config;
use crypto::Vault;
use features::FeatureResolver;
use metrics::Metrics;
use middleware::rate_limit::RateLimiter;
use mikrotik::client::MikrotikConnector;
use services::audit_service::AuditService;
use services::auth_service::AuthService;
use services::billing_service::BillingService;
use services::campaign_service::{CampaignService, PgCampaignStore};
use services::campaign_worker::CampaignWorker;
use services::client_service::ClientService;
use services::collector_service::CollectorService;
use services::isolation_service::{IsolationService, PgClientStatusStore};
use services::job_queue::RedisTaskQueue;
use services::outage_service::OutageService;
use services::radius_service::RadiusService;
use services::redis_service::RedisService;
use services::router_sync_service::RouterSyncService;
use services::scheduler_service::SchedulerService;
use services::wa_gateway::HttpWaGateway;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub redis: RedisService,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: RateLimiter,
    pub audit: AuditService,
    pub tenants: TenantRepository,
    pub features: FeatureResolver,
    pub auth: AuthService,

    pub billing: Arc<BillingService>,
    pub isolation: Arc<IsolationService>,
    pub clients: Arc<ClientService>,
    pub router_sync: Arc<RouterSyncService>,
    pub campaigns: Arc<CampaignService>,
    pub collector: Arc<CollectorService>,
    pub outages: Arc<OutageService>,
    pub radius: Arc<RadiusService>,
    pub wa_logs: WaLogRepository,
    pub entitlements: EntitlementRepository,

    pub started_at: Instant,
}

#[derive(Parser)]
#[command(name = "netbill")]
#[command(about = "NetBill ISP back-office", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and background workers (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Platform administration
    Admin {
        #[command(subcommand)]
        subcommand: AdminCommands,
    },
    /// Billing maintenance
    Billing {
        #[command(subcommand)]
        subcommand: BillingCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create a platform super admin
    CreateSuperAdmin {
        email: String,
        password: String,
    },
    /// Reset a super admin's password
    ResetPassword {
        email: String,
        password: String,
    },
}

#[derive(Subcommand)]
enum BillingCommands {
    /// Run the daily invoice generation pass immediately
    GenerateNow,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        println!("Warning: no .env loaded: {}", e);
    }

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env()?);

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir))?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "netbill-panel.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    info!("netbill-panel {} starting", env!("CARGO_PKG_VERSION"));

    let pool = netbill_db::db::init_db(&config.database_url, config.database_max_connections).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            netbill_db::db::run_migrations(&pool).await?;
            println!("Migrations applied.");
        }
        Commands::Serve => {
            netbill_db::db::run_migrations(&pool).await?;
            run_server(config, pool).await?;
        }
        Commands::Admin { subcommand } => {
            let (shutdown_tx, _) = broadcast::channel(1);
            let (state, audit_handle) = build_state(config, pool, &shutdown_tx).await?;
            match subcommand {
                AdminCommands::CreateSuperAdmin { email, password } => {
                    cli::create_super_admin(&state.auth, &email, &password).await?;
                }
                AdminCommands::ResetPassword { email, password } => {
                    cli::reset_password(&state.auth, &email, &password).await?;
                }
            }
            let _ = shutdown_tx.send(());
            let _ = audit_handle.await;
        }
        Commands::Billing { subcommand } => {
            let (shutdown_tx, _) = broadcast::channel(1);
            let (state, audit_handle) = build_state(config, pool, &shutdown_tx).await?;
            match subcommand {
                BillingCommands::GenerateNow => cli::generate_invoices_now(&state.billing).await?,
            }
            let _ = shutdown_tx.send(());
            let _ = audit_handle.await;
        }
    }

    Ok(())
}

/// Wires repositories and services. The audit writer is the only task spawned here.
async fn build_state(
    config: Arc<Config>,
    pool: PgPool,
    shutdown: &broadcast::Sender<()>,
) -> Result<(AppState, JoinHandle<()>)> {
    let redis = RedisService::new(&config.redis_url).await?;
    let queue_redis = if config.queue_redis_url == config.redis_url {
        redis.clone()
    } else {
        RedisService::new(&config.queue_redis_url).await?
    };

    let metrics = Arc::new(Metrics::new()?);
    let vault = Arc::new(Vault::new(&config.master_encryption_key).context("Invalid MASTER_ENCRYPTION_KEY")?);

    let tenants = TenantRepository::new(pool.clone());
    let clients_repo = ClientRepository::new(pool.clone());
    let invoices = InvoiceRepository::new(pool.clone());
    let routers = RouterRepository::new(pool.clone());
    let pppoe = PppoeRepository::new(pool.clone());
    let entitlements = EntitlementRepository::new(pool.clone());
    let wa_logs = WaLogRepository::new(pool.clone());

    let features = FeatureResolver::new(Arc::new(entitlements.clone()));

    let connector = Arc::new(MikrotikConnector::new(Duration::from_secs(config.router_timeout_secs))?);
    let router_sync = Arc::new(RouterSyncService::new(
        routers.clone(),
        pppoe.clone(),
        vault.clone(),
        connector,
        features.clone(),
        metrics.clone(),
    ));

    let isolation = Arc::new(IsolationService::new(
        Arc::new(PgClientStatusStore::new(clients_repo.clone(), invoices.clone())),
        router_sync.clone(),
    ));
    let clients = Arc::new(ClientService::new(
        clients_repo.clone(),
        features.clone(),
        vault.clone(),
        router_sync.clone(),
    ));
    let billing = Arc::new(BillingService::new(
        tenants.clone(),
        clients_repo.clone(),
        invoices.clone(),
        PaymentRepository::new(pool.clone()),
        isolation.clone(),
        metrics.clone(),
        config.default_utc_offset_minutes,
    ));
    let campaigns = Arc::new(CampaignService::new(
        Arc::new(PgCampaignStore::new(clients_repo.clone(), CampaignRepository::new(pool.clone()))),
        Arc::new(RedisTaskQueue::new(queue_redis)),
    ));
    let collector = Arc::new(CollectorService::new(
        CollectorRepository::new(pool.clone()),
        invoices.clone(),
        billing.clone(),
    ));
    let outages = Arc::new(OutageService::new(TopologyRepository::new(pool.clone())));
    let radius = Arc::new(RadiusService::new(
        routers,
        pppoe,
        RadiusRepository::new(pool.clone()),
        vault,
    ));

    let tokens = TokenService::new(&config.jwt_secret, config.jwt_access_ttl_secs, config.jwt_refresh_ttl_secs);
    let rate_limiter = RateLimiter::new(
        Arc::new(redis.clone()),
        config.rate_limits,
        tokens.clone(),
        metrics.clone(),
    );
    let auth = AuthService::new(
        UserRepository::new(pool.clone()),
        tenants.clone(),
        entitlements.clone(),
        tokens,
        PasswordHasher::new()?,
        redis.clone(),
    );

    let (audit, audit_handle) =
        AuditService::start(AuditRepository::new(pool.clone()), metrics.clone(), shutdown.subscribe());

    let state = AppState {
        config,
        pool,
        rate_limiter,
        redis,
        metrics,
        audit,
        tenants,
        features,
        auth,
        billing,
        isolation,
        clients,
        router_sync,
        campaigns,
        collector,
        outages,
        radius,
        wa_logs,
        entitlements,
        started_at: Instant::now(),
    };
    Ok((state, audit_handle))
}

async fn run_server(config: Arc<Config>, pool: PgPool) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (state, audit_handle) = build_state(config.clone(), pool.clone(), &shutdown_tx).await?;

    let mut handles = vec![audit_handle];

    let scheduler = Arc::new(SchedulerService::new(
        state.billing.clone(),
        state.isolation.clone(),
        state.tenants.clone(),
        ClientRepository::new(pool.clone()),
        config.client_retention_days,
    ));
    handles.extend(scheduler.spawn_all(&shutdown_tx));

    match (&config.wa_gateway_url, &config.wa_gateway_token) {
        (Some(url), Some(token)) => {
            let gateway = Arc::new(HttpWaGateway::new(url, token)?);
            let queue_redis = RedisService::new(&config.queue_redis_url).await?;
            let worker = Arc::new(CampaignWorker::new(
                Arc::new(RedisTaskQueue::new(queue_redis)),
                state.campaigns.clone(),
                gateway,
                Arc::new(state.wa_logs.clone()),
                state.metrics.clone(),
            ));
            handles.extend(worker.start(config.worker_concurrency, &shutdown_tx));
        }
        _ => warn!("WA_GATEWAY_URL/WA_GATEWAY_TOKEN not set; campaign worker disabled"),
    }

    let app = routes::build(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped; draining background tasks");
    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
