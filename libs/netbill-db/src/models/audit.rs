use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub request_id: String,
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub method: String,
    pub path: String,
    pub status: i32,
    pub duration_ms: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditLog {
    pub request_id: String,
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub method: String,
    pub path: String,
    pub status: i32,
    pub duration_ms: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}
