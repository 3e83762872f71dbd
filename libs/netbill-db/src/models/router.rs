use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(RouterType {
    Mikrotik => "mikrotik",
});

crate::string_enum!(RouterStatus {
    Online => "online",
    Offline => "offline",
    Unknown => "unknown",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Router {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[sqlx(rename = "type")]
    #[sqlx(try_from = "String")]
    pub router_type: RouterType,
    pub host: String,
    pub api_port: i32,
    pub api_use_tls: bool,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_enc: String,
    pub connectivity_mode: String,
    pub nas_ip: Option<String>,
    pub radius_enabled: bool,
    #[serde(skip_serializing)]
    pub radius_secret_enc: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: RouterStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NetworkProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// MikroTik-side profile identifier.
    pub name: String,
    pub download_speed: String,
    pub upload_speed: String,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PppoeSecret {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Option<Uuid>,
    pub router_id: Uuid,
    pub profile_id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_enc: String,
    pub service: String,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
    pub is_disabled: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPppoeSecret {
    pub tenant_id: Uuid,
    pub client_id: Option<Uuid>,
    pub router_id: Uuid,
    pub profile_id: Uuid,
    pub username: String,
    pub password_enc: String,
    pub service: String,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
    pub is_disabled: bool,
}
