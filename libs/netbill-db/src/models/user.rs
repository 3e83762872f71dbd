use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(Role {
    SuperAdmin => "super_admin",
    Owner => "owner",
    Admin => "admin",
    Staff => "staff",
    Technician => "technician",
    Collector => "collector",
    ClientViewer => "client_viewer",
});

crate::string_enum!(UserStatus {
    Active => "active",
    Disabled => "disabled",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    /// `None` for platform super-admins.
    pub tenant_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub status: UserStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}
