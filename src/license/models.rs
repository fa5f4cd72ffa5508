use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

use crate::central::RemoteLicense;
use crate::resources::{default_limits, LicenseStatus, ResourceKind, ResourceLimits, Tier};

/// key: license-snapshot -> cached projection of the tenant entitlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseSnapshot {
    pub license_key: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub tier: Tier,
    pub status: LicenseStatus,
    pub expiry_date: Option<NaiveDate>,
    pub resource_limits: ResourceLimits,
    pub enabled_features: BTreeSet<String>,
    pub enabled_apps: BTreeSet<String>,
    pub last_synced: Option<DateTime<Utc>>,
    pub sync_status: Option<String>,
    pub sync_error: Option<String>,
}

impl LicenseSnapshot {
    /// A local license for `tier` carrying the tier's default limits.
    pub fn for_tier(license_key: impl Into<String>, tier: Tier, status: LicenseStatus) -> Self {
        Self {
            license_key: license_key.into(),
            customer_id: None,
            customer_name: None,
            tier,
            status,
            expiry_date: None,
            resource_limits: default_limits(tier).normalized(),
            enabled_features: BTreeSet::new(),
            enabled_apps: BTreeSet::new(),
            last_synced: None,
            sync_status: None,
            sync_error: None,
        }
    }

    pub fn from_remote(license_key: &str, remote: RemoteLicense, now: DateTime<Utc>) -> Self {
        let tier = remote
            .tier
            .as_deref()
            .map(|raw| {
                raw.parse::<Tier>().unwrap_or_else(|err| {
                    warn!(%err, "central API sent an unknown tier; treating as Trial");
                    Tier::Trial
                })
            })
            .unwrap_or(Tier::Trial);
        let status = remote
            .status
            .as_deref()
            .map(|raw| {
                raw.parse::<LicenseStatus>().unwrap_or_else(|err| {
                    warn!(%err, "central API sent an unknown license status; treating as Suspended");
                    LicenseStatus::Suspended
                })
            })
            .unwrap_or(LicenseStatus::Trial);

        // Resources the central service leaves out are unlimited, including
        // when the limits object is missing altogether.
        let resource_limits = if remote.resource_limits.is_object() {
            ResourceLimits::from_json(&remote.resource_limits)
        } else {
            ResourceLimits::new().normalized()
        };

        Self {
            license_key: license_key.to_string(),
            customer_id: remote.customer_id.clone(),
            customer_name: remote.customer_name.clone(),
            tier,
            status,
            expiry_date: remote.expiry(),
            resource_limits,
            enabled_features: remote.enabled_features.into_iter().collect(),
            enabled_apps: remote.enabled_apps.into_iter().collect(),
            last_synced: Some(now),
            sync_status: Some("Synced".to_string()),
            sync_error: None,
        }
    }

    /// Valid when Active or Trial and not past its expiry date.
    pub fn is_valid_on(&self, today: NaiveDate) -> bool {
        if !self.status.is_usable() {
            return false;
        }
        match self.expiry_date {
            Some(expiry) => expiry >= today,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_on(Utc::now().date_naive())
    }

    pub fn limit(&self, resource: ResourceKind) -> f64 {
        self.resource_limits.get(resource)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.enabled_features.contains(feature)
    }

    pub fn has_app(&self, app: &str) -> bool {
        self.enabled_apps.contains(app)
    }
}

/// key: license-row -> persisted license columns
#[derive(Debug, Clone, FromRow)]
pub struct LicenseRow {
    pub license_key: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub tier: String,
    pub status: String,
    pub expiry_date: Option<NaiveDate>,
    pub resource_limits: serde_json::Value,
    pub enabled_features: Vec<String>,
    pub enabled_apps: Vec<String>,
    pub last_synced: Option<DateTime<Utc>>,
    pub sync_status: Option<String>,
    pub sync_error: Option<String>,
}

impl From<LicenseRow> for LicenseSnapshot {
    fn from(row: LicenseRow) -> Self {
        Self {
            tier: row.tier.parse().unwrap_or(Tier::Trial),
            status: row.status.parse().unwrap_or(LicenseStatus::Suspended),
            resource_limits: ResourceLimits::from_json(&row.resource_limits),
            enabled_features: row.enabled_features.into_iter().collect(),
            enabled_apps: row.enabled_apps.into_iter().collect(),
            license_key: row.license_key,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            expiry_date: row.expiry_date,
            last_synced: row.last_synced,
            sync_status: row.sync_status,
            sync_error: row.sync_error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseSyncOutcome {
    pub success: bool,
    pub message: String,
    pub license: Option<LicenseSnapshot>,
}

impl LicenseSyncOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            license: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    #[test]
    fn validity_requires_usable_status_and_future_expiry() {
        let mut license = LicenseSnapshot::for_tier("LIC-1", Tier::Builder, LicenseStatus::Active);
        assert!(license.is_valid_on(today()));

        license.expiry_date = Some(today());
        assert!(license.is_valid_on(today()), "expiring today is still valid");

        license.expiry_date = today().pred_opt();
        assert!(!license.is_valid_on(today()));

        license.expiry_date = None;
        license.status = LicenseStatus::Suspended;
        assert!(!license.is_valid_on(today()));

        license.status = LicenseStatus::Trial;
        assert!(license.is_valid_on(today()));
    }

    #[test]
    fn remote_payload_maps_onto_snapshot() {
        let remote: RemoteLicense = serde_json::from_value(json!({
            "customer_id": "CUST-9",
            "tier": "Growth",
            "status": "Active",
            "expiry_date": "2027-01-01",
            "resource_limits": {"api_calls": 200000, "emails": 5000},
            "enabled_features": ["webhooks", "ai_agents"],
            "enabled_apps": ["flowz"]
        }))
        .unwrap();

        let now = Utc::now();
        let snapshot = LicenseSnapshot::from_remote("LIC-9", remote, now);
        assert_eq!(snapshot.tier, Tier::Growth);
        assert_eq!(snapshot.status, LicenseStatus::Active);
        assert_eq!(snapshot.limit(ResourceKind::ApiCalls), 200_000.0);
        assert_eq!(snapshot.limit(ResourceKind::StorageGb), 0.0);
        assert!(snapshot.has_feature("ai_agents"));
        assert!(snapshot.has_app("flowz"));
        assert!(!snapshot.has_app("botz"));
        assert_eq!(snapshot.sync_status.as_deref(), Some("Synced"));
        assert_eq!(snapshot.last_synced, Some(now));
    }

    #[test]
    fn remote_without_limits_is_unlimited() {
        let remote = RemoteLicense {
            tier: Some("Builder".to_string()),
            status: Some("Active".to_string()),
            ..RemoteLicense::default()
        };
        let snapshot = LicenseSnapshot::from_remote("LIC-2", remote, Utc::now());
        assert_eq!(snapshot.resource_limits, ResourceLimits::new().normalized());
        for resource in ResourceKind::ALL {
            assert_eq!(snapshot.limit(resource), 0.0);
        }
    }

    #[test]
    fn snapshot_survives_cache_serialization() {
        let mut license = LicenseSnapshot::for_tier("LIC-3", Tier::Legend, LicenseStatus::Active);
        license.enabled_apps.insert("flowz".to_string());
        let cached = serde_json::to_value(&license).unwrap();
        let restored: LicenseSnapshot = serde_json::from_value(cached).unwrap();
        assert_eq!(restored, license);
    }
}
