pub mod audit;
pub mod campaign;
pub mod client;
pub mod collector;
pub mod invoice;
pub mod plan;
pub mod radius;
pub mod router;
pub mod tenant;
pub mod topology;
pub mod user;
