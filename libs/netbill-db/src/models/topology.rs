use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(NodeKind {
    Odc => "odc",
    Odp => "odp",
    Client => "client",
});

crate::string_enum!(OutageStatus {
    Open => "open",
    Resolved => "resolved",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopologyLink {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub from_kind: NodeKind,
    pub from_id: Uuid,
    #[sqlx(try_from = "String")]
    pub to_kind: NodeKind,
    pub to_id: Uuid,
}

impl TopologyLink {
    pub fn from_ref(&self) -> NodeRef {
        NodeRef { kind: self.from_kind, id: self.from_id }
    }

    pub fn to_ref(&self) -> NodeRef {
        NodeRef { kind: self.to_kind, id: self.to_id }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutageEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub node_kind: NodeKind,
    pub node_id: Uuid,
    pub reason: String,
    #[sqlx(json)]
    pub affected: Vec<NodeRef>,
    #[sqlx(try_from = "String")]
    pub status: OutageStatus,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
