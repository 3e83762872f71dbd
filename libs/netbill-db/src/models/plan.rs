use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Limit value meaning "no ceiling".
pub const UNLIMITED: i64 = -1;

/// Feature list entry granting every feature.
pub const ALL_FEATURES: &str = "*";

crate::string_enum!(AddonType {
    Feature => "feature",
    LimitBoost => "limit_boost",
    Quota => "quota",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    #[sqlx(json)]
    pub limits: HashMap<String, i64>,
    #[sqlx(json)]
    pub features: Vec<String>,
    pub is_active: bool,
    pub is_public: bool,
    pub sort_order: i32,
    pub price_monthly: i64,
    pub currency: String,
}

impl Plan {
    pub fn grants(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == ALL_FEATURES || f == feature)
    }

    pub fn limit(&self, key: &str) -> i64 {
        self.limits.get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Addon {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    #[sqlx(rename = "type")]
    #[sqlx(try_from = "String")]
    pub addon_type: AddonType,
    #[sqlx(json)]
    pub value: serde_json::Value,
    #[sqlx(json)]
    pub available_for_plans: Vec<String>,
    pub price_monthly: i64,
}

/// Typed view of `Addon.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddonValue {
    Feature(String),
    LimitBoost(HashMap<String, i64>),
    Quota(HashMap<String, i64>),
}

impl AddonValue {
    /// `feature` payloads are either a bare string or `{"feature": "..."}`.
    pub fn parse(addon_type: AddonType, value: &serde_json::Value) -> Option<Self> {
        match addon_type {
            AddonType::Feature => match value {
                serde_json::Value::String(s) => Some(AddonValue::Feature(s.clone())),
                serde_json::Value::Object(map) => map
                    .get("feature")
                    .and_then(|v| v.as_str())
                    .map(|s| AddonValue::Feature(s.to_string())),
                _ => None,
            },
            AddonType::LimitBoost => serde_json::from_value(value.clone()).ok().map(AddonValue::LimitBoost),
            AddonType::Quota => serde_json::from_value(value.clone()).ok().map(AddonValue::Quota),
        }
    }
}

/// A tenant's purchased addon joined with its catalogue row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActiveAddon {
    pub tenant_addon_id: Uuid,
    pub tenant_id: Uuid,
    pub addon_id: Uuid,
    pub code: String,
    #[sqlx(rename = "type")]
    #[sqlx(try_from = "String")]
    pub addon_type: AddonType,
    #[sqlx(json)]
    pub value: serde_json::Value,
    pub quantity: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ActiveAddon {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    pub fn typed_value(&self) -> Option<AddonValue> {
        AddonValue::parse(self.addon_type, &self.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeatureToggle {
    pub id: Uuid,
    pub code: String,
    pub tenant_id: Option<Uuid>,
    pub is_enabled: bool,
    #[sqlx(json)]
    pub conditions: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
