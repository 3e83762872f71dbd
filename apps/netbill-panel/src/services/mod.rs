pub mod audit_service;
pub mod auth_service;
pub mod billing_service;
pub mod campaign_service;
pub mod campaign_worker;
pub mod client_service;
pub mod collector_service;
pub mod isolation_service;
pub mod job_queue;
pub mod outage_service;
pub mod radius_service;
pub mod redis_service;
pub mod router_sync_service;
pub mod scheduler_service;
pub mod wa_gateway;
