pub mod audit_repo;
pub mod campaign_repo;
pub mod client_repo;
pub mod collector_repo;
pub mod entitlement_repo;
pub mod invoice_repo;
pub mod payment_repo;
pub mod pppoe_repo;
pub mod radius_repo;
pub mod router_repo;
pub mod tenant_repo;
pub mod topology_repo;
pub mod user_repo;
pub mod wa_log_repo;
