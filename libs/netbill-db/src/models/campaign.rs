use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(CampaignStatus {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Cancelled => "cancelled",
});

crate::string_enum!(RecipientStatus {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub message: String,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    pub total: i32,
    pub sent: i32,
    pub failed: i32,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn pending(&self) -> i32 {
        (self.total - self.sent - self.failed).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub client_id: Option<Uuid>,
    pub phone: String,
    #[sqlx(try_from = "String")]
    pub status: RecipientStatus,
    pub error: Option<String>,
    pub message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Recipient candidate resolved from a client group.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RecipientTarget {
    pub client_id: Uuid,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WaMessageLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub phone: String,
    pub message: String,
    pub status: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWaMessageLog {
    pub tenant_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub phone: String,
    pub message: String,
    pub status: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
}
