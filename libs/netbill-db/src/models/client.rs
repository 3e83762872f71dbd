use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(ClientStatus {
    Active => "active",
    Isolir => "isolir",
    Suspended => "suspended",
    Cancelled => "cancelled",
});

crate::string_enum!(ClientCategory {
    Lite => "lite",
    Regular => "regular",
    Business => "business",
    Enterprise => "enterprise",
});

crate::string_enum!(ConnectionType {
    Pppoe => "pppoe",
    Hotspot => "hotspot",
    Static => "static",
});

crate::string_enum!(PaymentTempoOption {
    Default => "default",
    Template => "template",
    Manual => "manual",
});

pub const ISOLIR_REASON_OVERDUE: &str = "overdue_invoice";

impl ClientStatus {
    /// Fixed legality table for client status changes.
    pub fn can_transition_to(self, next: ClientStatus) -> bool {
        use ClientStatus::*;
        matches!(
            (self, next),
            (Active, Isolir)
                | (Active, Suspended)
                | (Active, Cancelled)
                | (Isolir, Active)
                | (Isolir, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_code: String,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[sqlx(try_from = "String")]
    pub category: ClientCategory,
    #[sqlx(try_from = "String")]
    pub connection_type: ConnectionType,
    pub router_id: Option<Uuid>,
    pub pppoe_username: Option<String>,
    #[serde(skip_serializing)]
    pub pppoe_password_enc: Option<String>,
    pub service_package_id: Uuid,
    pub voucher_package_id: Option<Uuid>,
    pub device_count: Option<i32>,
    pub group_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: ClientStatus,
    pub isolir_reason: Option<String>,
    pub isolir_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub payment_tempo_option: PaymentTempoOption,
    pub payment_due_day: i32,
    pub payment_tempo_template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServicePackage {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub category: ClientCategory,
    pub monthly_fee: i64,
    pub profile_id: Option<Uuid>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentTempoTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub due_day: i32,
}

/// Row shape for client inserts; produced after validation.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub tenant_id: Uuid,
    pub client_code: String,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub category: ClientCategory,
    pub connection_type: ConnectionType,
    pub router_id: Option<Uuid>,
    pub pppoe_username: Option<String>,
    pub pppoe_password_enc: Option<String>,
    pub service_package_id: Uuid,
    pub voucher_package_id: Option<Uuid>,
    pub device_count: Option<i32>,
    pub group_id: Option<Uuid>,
    pub payment_tempo_option: PaymentTempoOption,
    pub payment_due_day: i32,
    pub payment_tempo_template_id: Option<Uuid>,
}

/// `C<YYMMDD>-<8 hex>`.
pub fn generate_client_code(today: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("C{}-{}", today.format("%y%m%d"), &suffix[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legality_table_matches_allowed_pairs() {
        use ClientStatus::*;
        let allowed = [
            (Active, Isolir),
            (Active, Suspended),
            (Active, Cancelled),
            (Isolir, Active),
            (Isolir, Cancelled),
        ];
        for from in ClientStatus::ALL {
            for to in ClientStatus::ALL {
                let expected = allowed.contains(&(*from, *to));
                assert_eq!(from.can_transition_to(*to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn client_code_has_expected_shape() {
        let code = generate_client_code(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap());
        assert!(code.starts_with("C260305-"));
        assert_eq!(code.len(), "C260305-".len() + 8);
        assert!(code[8..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
