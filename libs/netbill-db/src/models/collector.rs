use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(VisitStatus {
    Collected => "collected",
    Deposited => "deposited",
    Reconciled => "reconciled",
});

impl VisitStatus {
    /// collected -> deposited -> reconciled, one step at a time.
    pub fn next(self) -> Option<VisitStatus> {
        match self {
            VisitStatus::Collected => Some(VisitStatus::Deposited),
            VisitStatus::Deposited => Some(VisitStatus::Reconciled),
            VisitStatus::Reconciled => None,
        }
    }
}

/// Cash a collector picked up in the field.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CollectorVisit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub collector_id: Uuid,
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    pub status: VisitStatus,
    pub notes: Option<String>,
    pub visited_at: DateTime<Utc>,
    pub deposited_at: Option<DateTime<Utc>>,
    pub deposit_confirmed_by: Option<Uuid>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_by: Option<Uuid>,
    pub payment_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        assert_eq!(VisitStatus::Collected.next(), Some(VisitStatus::Deposited));
        assert_eq!(VisitStatus::Deposited.next(), Some(VisitStatus::Reconciled));
        assert_eq!(VisitStatus::Reconciled.next(), None);
    }
}
