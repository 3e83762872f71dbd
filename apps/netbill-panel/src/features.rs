//! Feature and limit resolution for tenants.
//!
//! Features cascade global toggle -> tenant toggle -> addon -> plan and stop at
//! the first conclusive layer. Limits are the plan value plus every active
//! `limit_boost` addon, with `-1` meaning unlimited.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netbill_db::models::plan::{ActiveAddon, AddonValue, Plan, UNLIMITED};
use netbill_db::repositories::entitlement_repo::EntitlementRepository;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

pub const FEATURE_CLIENT_MANAGEMENT: &str = "client_management";
pub const FEATURE_BILLING_BASIC: &str = "billing_basic";
pub const FEATURE_WA_GATEWAY: &str = "wa_gateway";
pub const FEATURE_ROUTER_SYNC: &str = "mikrotik_integration";
pub const FEATURE_COLLECTOR: &str = "collector_app";
pub const FEATURE_NETWORK_MAP: &str = "network_map";
pub const FEATURE_RADIUS: &str = "radius";

pub const KNOWN_FEATURES: &[&str] = &[
    FEATURE_CLIENT_MANAGEMENT,
    FEATURE_BILLING_BASIC,
    FEATURE_WA_GATEWAY,
    FEATURE_ROUTER_SYNC,
    FEATURE_COLLECTOR,
    FEATURE_NETWORK_MAP,
    FEATURE_RADIUS,
];

pub const LIMIT_MAX_CLIENTS: &str = "max_clients";
pub const LIMIT_MAX_ROUTERS: &str = "max_routers";

/// Snapshot of one limit against current usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitUsage {
    pub key: String,
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
    pub unlimited: bool,
    pub within_limit: bool,
}

impl LimitUsage {
    pub fn new(key: &str, limit: i64, used: i64) -> Self {
        Self {
            key: key.to_string(),
            limit,
            used,
            remaining: remaining(limit, used),
            unlimited: is_unlimited(limit),
            within_limit: is_within_limit(limit, used),
        }
    }
}

#[async_trait]
pub trait EntitlementSource: Send + Sync {
    /// `Some(enabled)` when a global toggle row exists.
    async fn global_toggle(&self, code: &str) -> Result<Option<bool>>;
    async fn tenant_toggle(&self, tenant_id: Uuid, code: &str) -> Result<Option<bool>>;
    async fn active_addons(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ActiveAddon>>;
    async fn plan(&self, tenant_id: Uuid) -> Result<Option<Plan>>;
}

#[async_trait]
impl EntitlementSource for EntitlementRepository {
    async fn global_toggle(&self, code: &str) -> Result<Option<bool>> {
        Ok(self.get_global_toggle(code).await?.map(|t| t.is_enabled))
    }

    async fn tenant_toggle(&self, tenant_id: Uuid, code: &str) -> Result<Option<bool>> {
        Ok(self.get_tenant_toggle(tenant_id, code).await?.map(|t| t.is_enabled))
    }

    async fn active_addons(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ActiveAddon>> {
        self.list_active_addons(tenant_id, now).await
    }

    async fn plan(&self, tenant_id: Uuid) -> Result<Option<Plan>> {
        self.get_plan_for_tenant(tenant_id).await
    }
}

fn addon_grants(addons: &[ActiveAddon], feature: &str, now: DateTime<Utc>) -> bool {
    addons
        .iter()
        .filter(|a| !a.is_expired(now))
        .any(|a| matches!(a.typed_value(), Some(AddonValue::Feature(f)) if f == feature))
}

/// Sum of boosts for `key`; each addon counts once per purchased unit.
fn boost_total(addons: &[ActiveAddon], key: &str, now: DateTime<Utc>) -> i64 {
    addons
        .iter()
        .filter(|a| !a.is_expired(now))
        .filter_map(|a| match a.typed_value() {
            Some(AddonValue::LimitBoost(map)) => map.get(key).map(|v| v * i64::from(a.quantity.max(1))),
            _ => None,
        })
        .sum()
}

pub fn evaluate_limit(plan: Option<&Plan>, addons: &[ActiveAddon], key: &str, now: DateTime<Utc>) -> i64 {
    let base = plan.map(|p| p.limit(key)).unwrap_or(0);
    if base == UNLIMITED {
        return UNLIMITED;
    }
    base + boost_total(addons, key, now)
}

pub fn is_unlimited(limit: i64) -> bool {
    limit == UNLIMITED
}

/// Current usage does not exceed the limit.
pub fn is_within_limit(limit: i64, current: i64) -> bool {
    is_unlimited(limit) || current <= limit
}

pub fn can_add(limit: i64, current: i64, delta: i64) -> bool {
    is_unlimited(limit) || current + delta <= limit
}

/// `-1` when unlimited, otherwise never negative.
pub fn remaining(limit: i64, current: i64) -> i64 {
    if is_unlimited(limit) {
        UNLIMITED
    } else {
        (limit - current).max(0)
    }
}

#[derive(Clone)]
pub struct FeatureResolver {
    source: Arc<dyn EntitlementSource>,
}

impl FeatureResolver {
    pub fn new(source: Arc<dyn EntitlementSource>) -> Self {
        Self { source }
    }

    /// Never errors; a failed lookup means the feature is unavailable.
    pub async fn has(&self, tenant_id: Uuid, feature: &str) -> bool {
        match self.resolve(tenant_id, feature).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!("Feature lookup for tenant {} ({}) failed: {:#}", tenant_id, feature, e);
                false
            }
        }
    }

    async fn resolve(&self, tenant_id: Uuid, feature: &str) -> Result<bool> {
        if self.source.global_toggle(feature).await? == Some(false) {
            return Ok(false);
        }
        if let Some(enabled) = self.source.tenant_toggle(tenant_id, feature).await? {
            return Ok(enabled);
        }
        let now = Utc::now();
        let addons = self.source.active_addons(tenant_id, now).await?;
        if addon_grants(&addons, feature, now) {
            return Ok(true);
        }
        let plan = self.source.plan(tenant_id).await?;
        Ok(plan.is_some_and(|p| p.grants(feature)))
    }

    pub async fn has_any(&self, tenant_id: Uuid, features: &[&str]) -> bool {
        for feature in features {
            if self.has(tenant_id, feature).await {
                return true;
            }
        }
        false
    }

    pub async fn has_all(&self, tenant_id: Uuid, features: &[&str]) -> bool {
        self.missing(tenant_id, features).await.is_empty()
    }

    pub async fn missing(&self, tenant_id: Uuid, features: &[&str]) -> Vec<String> {
        let mut missing = Vec::new();
        for feature in features {
            if !self.has(tenant_id, feature).await {
                missing.push(feature.to_string());
            }
        }
        missing
    }

    /// Missing plan counts as zero; a failed lookup yields zero as well.
    pub async fn limit(&self, tenant_id: Uuid, key: &str) -> i64 {
        let now = Utc::now();
        let plan = match self.source.plan(tenant_id).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Plan lookup for tenant {} failed: {:#}", tenant_id, e);
                return 0;
            }
        };
        if plan.as_ref().is_some_and(|p| p.limit(key) == UNLIMITED) {
            return UNLIMITED;
        }
        let addons = match self.source.active_addons(tenant_id, now).await {
            Ok(addons) => addons,
            Err(e) => {
                warn!("Addon lookup for tenant {} failed: {:#}", tenant_id, e);
                Vec::new()
            }
        };
        evaluate_limit(plan.as_ref(), &addons, key, now)
    }

    pub async fn can_add(&self, tenant_id: Uuid, key: &str, current: i64, delta: i64) -> bool {
        can_add(self.limit(tenant_id, key).await, current, delta)
    }

    pub async fn remaining(&self, tenant_id: Uuid, key: &str, current: i64) -> i64 {
        remaining(self.limit(tenant_id, key).await, current)
    }

    pub async fn usage(&self, tenant_id: Uuid, key: &str, current: i64) -> LimitUsage {
        LimitUsage::new(key, self.limit(tenant_id, key).await, current)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use netbill_db::models::plan::AddonType;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeEntitlements {
        pub global: Mutex<HashMap<String, bool>>,
        pub tenant: Mutex<HashMap<(Uuid, String), bool>>,
        pub addons: Mutex<Vec<ActiveAddon>>,
        pub plan: Mutex<Option<Plan>>,
        pub fail: bool,
    }

    #[async_trait]
    impl EntitlementSource for FakeEntitlements {
        async fn global_toggle(&self, code: &str) -> Result<Option<bool>> {
            if self.fail {
                anyhow::bail!("db down");
            }
            Ok(self.global.lock().unwrap().get(code).copied())
        }

        async fn tenant_toggle(&self, tenant_id: Uuid, code: &str) -> Result<Option<bool>> {
            Ok(self.tenant.lock().unwrap().get(&(tenant_id, code.to_string())).copied())
        }

        async fn active_addons(&self, tenant_id: Uuid, _now: DateTime<Utc>) -> Result<Vec<ActiveAddon>> {
            Ok(self.addons.lock().unwrap().iter().filter(|a| a.tenant_id == tenant_id).cloned().collect())
        }

        async fn plan(&self, _tenant_id: Uuid) -> Result<Option<Plan>> {
            if self.fail {
                anyhow::bail!("db down");
            }
            Ok(self.plan.lock().unwrap().clone())
        }
    }

    pub fn plan(features: &[&str], limits: &[(&str, i64)]) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            code: "basic".into(),
            name: "Basic".into(),
            limits: limits.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            features: features.iter().map(|f| f.to_string()).collect(),
            is_active: true,
            is_public: true,
            sort_order: 1,
            price_monthly: 150_000,
            currency: "IDR".into(),
        }
    }

    pub fn addon(tenant_id: Uuid, addon_type: AddonType, value: serde_json::Value, expires_at: Option<DateTime<Utc>>) -> ActiveAddon {
        ActiveAddon {
            tenant_addon_id: Uuid::new_v4(),
            tenant_id,
            addon_id: Uuid::new_v4(),
            code: "addon".into(),
            addon_type,
            value,
            quantity: 1,
            expires_at,
        }
    }

    #[tokio::test]
    async fn tenant_toggle_beats_addon() {
        let tenant = Uuid::new_v4();
        let source = Arc::new(FakeEntitlements::default());
        *source.plan.lock().unwrap() = Some(plan(&["client_management", "billing_basic"], &[]));
        source.global.lock().unwrap().insert(FEATURE_WA_GATEWAY.into(), true);
        source
            .addons
            .lock()
            .unwrap()
            .push(addon(tenant, AddonType::Feature, serde_json::json!("wa_gateway"), None));

        let resolver = FeatureResolver::new(source.clone());
        assert!(resolver.has(tenant, FEATURE_WA_GATEWAY).await);

        source.tenant.lock().unwrap().insert((tenant, FEATURE_WA_GATEWAY.into()), false);
        assert!(!resolver.has(tenant, FEATURE_WA_GATEWAY).await);
    }

    #[tokio::test]
    async fn global_disable_overrides_everything() {
        let tenant = Uuid::new_v4();
        let source = Arc::new(FakeEntitlements::default());
        *source.plan.lock().unwrap() = Some(plan(&["*"], &[]));
        source.tenant.lock().unwrap().insert((tenant, "radius".into()), true);
        source.global.lock().unwrap().insert("radius".into(), false);

        let resolver = FeatureResolver::new(source);
        assert!(!resolver.has(tenant, "radius").await);
        assert!(resolver.has(tenant, "anything_else").await);
    }

    #[tokio::test]
    async fn expired_addons_grant_nothing() {
        let tenant = Uuid::new_v4();
        let source = Arc::new(FakeEntitlements::default());
        *source.plan.lock().unwrap() = Some(plan(&[], &[("max_clients", 100)]));
        let past = Utc::now() - Duration::days(1);
        source.addons.lock().unwrap().extend([
            addon(tenant, AddonType::Feature, serde_json::json!({"feature": "network_map"}), Some(past)),
            addon(tenant, AddonType::LimitBoost, serde_json::json!({"max_clients": 50}), Some(past)),
            addon(tenant, AddonType::LimitBoost, serde_json::json!({"max_clients": 25}), None),
        ]);

        let resolver = FeatureResolver::new(source);
        assert!(!resolver.has(tenant, FEATURE_NETWORK_MAP).await);
        assert_eq!(resolver.limit(tenant, LIMIT_MAX_CLIENTS).await, 125);
    }

    #[tokio::test]
    async fn unlimited_plan_ignores_boosts() {
        let tenant = Uuid::new_v4();
        let source = Arc::new(FakeEntitlements::default());
        *source.plan.lock().unwrap() = Some(plan(&[], &[("max_routers", UNLIMITED)]));
        source
            .addons
            .lock()
            .unwrap()
            .push(addon(tenant, AddonType::LimitBoost, serde_json::json!({"max_routers": 3}), None));

        let resolver = FeatureResolver::new(source);
        assert_eq!(resolver.limit(tenant, LIMIT_MAX_ROUTERS).await, UNLIMITED);
        assert!(resolver.can_add(tenant, LIMIT_MAX_ROUTERS, 10_000, 1).await);
        assert_eq!(resolver.remaining(tenant, LIMIT_MAX_ROUTERS, 5).await, UNLIMITED);
    }

    #[tokio::test]
    async fn lookup_failure_fails_closed() {
        let tenant = Uuid::new_v4();
        let source = Arc::new(FakeEntitlements { fail: true, ..Default::default() });
        let resolver = FeatureResolver::new(source);
        assert!(!resolver.has(tenant, FEATURE_BILLING_BASIC).await);
        assert_eq!(resolver.limit(tenant, LIMIT_MAX_CLIENTS).await, 0);
    }

    #[tokio::test]
    async fn set_helpers_report_missing_codes() {
        let tenant = Uuid::new_v4();
        let source = Arc::new(FakeEntitlements::default());
        *source.plan.lock().unwrap() = Some(plan(&["billing_basic"], &[]));
        let resolver = FeatureResolver::new(source);

        assert!(resolver.has_any(tenant, &[FEATURE_WA_GATEWAY, FEATURE_BILLING_BASIC]).await);
        assert!(!resolver.has_all(tenant, &[FEATURE_WA_GATEWAY, FEATURE_BILLING_BASIC]).await);
        assert_eq!(
            resolver.missing(tenant, &[FEATURE_WA_GATEWAY, FEATURE_BILLING_BASIC]).await,
            vec![FEATURE_WA_GATEWAY.to_string()]
        );
    }

    #[test]
    fn limit_arithmetic() {
        assert!(is_within_limit(10, 10));
        assert!(!is_within_limit(10, 11));
        assert!(can_add(10, 9, 1));
        assert!(!can_add(10, 9, 2));
        assert_eq!(remaining(10, 12), 0);
        assert_eq!(evaluate_limit(None, &[], "max_clients", Utc::now()), 0);
    }

    #[test]
    fn usage_snapshot_reports_unlimited_as_minus_one() {
        let unlimited = LimitUsage::new(LIMIT_MAX_CLIENTS, UNLIMITED, 5_000);
        assert!(unlimited.unlimited && unlimited.within_limit);
        assert_eq!(unlimited.remaining, UNLIMITED);

        let over = LimitUsage::new(LIMIT_MAX_ROUTERS, 2, 3);
        assert!(!over.within_limit);
        assert_eq!(over.remaining, 0);
    }
}
