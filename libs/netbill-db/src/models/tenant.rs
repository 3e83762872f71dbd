use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(TenantStatus {
    Active => "active",
    Suspended => "suspended",
    Cancelled => "cancelled",
});

crate::string_enum!(DiscountKind {
    Percent => "percent",
    Nominal => "nominal",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub status: TenantStatus,
    pub billing_status: String,
    pub plan_id: Option<Uuid>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[sqlx(json)]
    pub settings: TenantSettings,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Default discount applied to every generated invoice of a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDiscount {
    pub enabled: bool,
    pub kind: DiscountKind,
    /// Percent (0-100) or a nominal amount in minor units.
    pub value: i64,
}

impl ServiceDiscount {
    /// Discount amount for a subtotal, never more than the subtotal.
    pub fn amount_for(&self, subtotal: i64) -> i64 {
        if !self.enabled || subtotal <= 0 {
            return 0;
        }
        let raw = match self.kind {
            DiscountKind::Percent => (subtotal as i128 * self.value.clamp(0, 100) as i128 / 100) as i64,
            DiscountKind::Nominal => self.value.max(0),
        };
        raw.min(subtotal)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_discount: Option<ServiceDiscount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tax_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Everything else the UI stores; not interpreted server-side.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TenantSettings {
    pub fn offset(&self, default_minutes: i32) -> FixedOffset {
        let minutes = self.utc_offset_minutes.unwrap_or(default_minutes);
        FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_discount_rounds_down() {
        let d = ServiceDiscount { enabled: true, kind: DiscountKind::Percent, value: 10 };
        assert_eq!(d.amount_for(155_555), 15_555);
    }

    #[test]
    fn nominal_discount_is_clamped_to_subtotal() {
        let d = ServiceDiscount { enabled: true, kind: DiscountKind::Nominal, value: 500_000 };
        assert_eq!(d.amount_for(150_000), 150_000);
    }

    #[test]
    fn disabled_discount_is_zero() {
        let d = ServiceDiscount { enabled: false, kind: DiscountKind::Nominal, value: 5_000 };
        assert_eq!(d.amount_for(150_000), 0);
    }

    #[test]
    fn settings_keep_unknown_keys() {
        let raw = serde_json::json!({
            "service_discount": {"enabled": true, "kind": "percent", "value": 5},
            "utc_offset_minutes": 480,
            "logo_url": "https://example.test/logo.png"
        });
        let settings: TenantSettings = serde_json::from_value(raw).unwrap();
        assert_eq!(settings.offset(420).local_minus_utc(), 480 * 60);
        assert!(settings.extra.contains_key("logo_url"));
    }
}
