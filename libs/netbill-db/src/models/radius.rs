use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RadiusAuthLog {
    pub id: i64,
    pub tenant_id: Uuid,
    pub router_id: Uuid,
    pub username: String,
    pub accepted: bool,
    pub reason: Option<String>,
    pub calling_station_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RadiusSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub router_id: Uuid,
    pub session_id: String,
    pub username: String,
    pub framed_ip: Option<String>,
    pub input_octets: i64,
    pub output_octets: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub terminate_cause: Option<String>,
}
