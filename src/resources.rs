use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// key: metered-resources -> fixed enumeration of billable resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    StorageGb,
    BandwidthGb,
    DatabaseGb,
    ApiCalls,
    FileUploadsGb,
    Executions,
    Emails,
    AiQueries,
    Webhooks,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::StorageGb,
        ResourceKind::BandwidthGb,
        ResourceKind::DatabaseGb,
        ResourceKind::ApiCalls,
        ResourceKind::FileUploadsGb,
        ResourceKind::Executions,
        ResourceKind::Emails,
        ResourceKind::AiQueries,
        ResourceKind::Webhooks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::StorageGb => "storage_gb",
            ResourceKind::BandwidthGb => "bandwidth_gb",
            ResourceKind::DatabaseGb => "database_gb",
            ResourceKind::ApiCalls => "api_calls",
            ResourceKind::FileUploadsGb => "file_uploads_gb",
            ResourceKind::Executions => "executions",
            ResourceKind::Emails => "emails",
            ResourceKind::AiQueries => "ai_queries",
            ResourceKind::Webhooks => "webhooks",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown resource kind `{0}`")]
    Resource(String),
    #[error("unknown tier `{0}`")]
    Tier(String),
    #[error("unknown license status `{0}`")]
    Status(String),
}

impl FromStr for ResourceKind {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| ParseError::Resource(value.to_string()))
    }
}

/// key: license-tiers -> founding tiers plus regular aliases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Trial,
    Pioneer,
    Builder,
    Visionary,
    Legend,
    Starter,
    Growth,
    Scale,
    Enterprise,
}

impl Tier {
    /// Regular tiers carry the same entitlements as their founding equivalent.
    pub fn canonical(self) -> Tier {
        match self {
            Tier::Starter => Tier::Pioneer,
            Tier::Growth => Tier::Builder,
            Tier::Scale => Tier::Visionary,
            Tier::Enterprise => Tier::Legend,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Trial => "Trial",
            Tier::Pioneer => "Pioneer",
            Tier::Builder => "Builder",
            Tier::Visionary => "Visionary",
            Tier::Legend => "Legend",
            Tier::Starter => "Starter",
            Tier::Growth => "Growth",
            Tier::Scale => "Scale",
            Tier::Enterprise => "Enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let tier = match value.trim() {
            "Trial" => Tier::Trial,
            "Pioneer" => Tier::Pioneer,
            "Builder" => Tier::Builder,
            "Visionary" => Tier::Visionary,
            "Legend" => Tier::Legend,
            "Starter" => Tier::Starter,
            "Growth" => Tier::Growth,
            "Scale" => Tier::Scale,
            "Enterprise" => Tier::Enterprise,
            other => return Err(ParseError::Tier(other.to_string())),
        };
        Ok(tier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseStatus {
    Active,
    Trial,
    Suspended,
    Expired,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "Active",
            LicenseStatus::Trial => "Trial",
            LicenseStatus::Suspended => "Suspended",
            LicenseStatus::Expired => "Expired",
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, LicenseStatus::Active | LicenseStatus::Trial)
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Active" => Ok(LicenseStatus::Active),
            "Trial" => Ok(LicenseStatus::Trial),
            "Suspended" => Ok(LicenseStatus::Suspended),
            "Expired" => Ok(LicenseStatus::Expired),
            other => Err(ParseError::Status(other.to_string())),
        }
    }
}

/// Per-resource limits. A limit of `0` (or a missing entry) means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceLimits(BTreeMap<ResourceKind, f64>);

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource: ResourceKind) -> f64 {
        self.0.get(&resource).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, resource: ResourceKind, limit: f64) {
        self.0.insert(resource, limit);
    }

    pub fn is_unlimited(&self, resource: ResourceKind) -> bool {
        self.get(resource) == 0.0
    }

    /// Fills every resource kind, defaulting absent entries to unlimited.
    pub fn normalized(mut self) -> Self {
        for resource in ResourceKind::ALL {
            self.0.entry(resource).or_insert(0.0);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, f64)> + '_ {
        self.0.iter().map(|(kind, limit)| (*kind, *limit))
    }

    /// Builds limits from a loosely typed JSON object, ignoring unknown keys and
    /// non-numeric values.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut limits = ResourceLimits::new();
        if let Some(map) = value.as_object() {
            for (key, raw) in map {
                let (Ok(kind), Some(limit)) = (key.parse::<ResourceKind>(), raw.as_f64()) else {
                    continue;
                };
                limits.set(kind, limit);
            }
        }
        limits.normalized()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .0
            .iter()
            .map(|(kind, limit)| (kind.as_str().to_string(), serde_json::json!(limit)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(ResourceKind, f64)> for ResourceLimits {
    fn from_iter<I: IntoIterator<Item = (ResourceKind, f64)>>(iter: I) -> Self {
        ResourceLimits(iter.into_iter().collect())
    }
}

/// key: tier-limit-table -> default entitlements per founding tier
pub fn default_limits(tier: Tier) -> ResourceLimits {
    use ResourceKind::*;

    // storage, bandwidth, database, api, uploads, executions, emails, ai, webhooks
    let row: [f64; 9] = match tier.canonical() {
        Tier::Pioneer => [10.0, 100.0, 2.0, 50_000.0, 5.0, 10_000.0, 1_000.0, 0.0, 5.0],
        Tier::Builder => [30.0, 300.0, 5.0, 200_000.0, 15.0, 50_000.0, 5_000.0, 1_000.0, 20.0],
        Tier::Visionary => [75.0, 750.0, 15.0, 1_000_000.0, 50.0, 0.0, 20_000.0, 5_000.0, 0.0],
        Tier::Legend => [150.0, 0.0, 50.0, 0.0, 0.0, 0.0, 0.0, 20_000.0, 0.0],
        _ => [1.0, 10.0, 0.5, 5_000.0, 1.0, 1_000.0, 100.0, 0.0, 2.0],
    };

    [
        StorageGb,
        BandwidthGb,
        DatabaseGb,
        ApiCalls,
        FileUploadsGb,
        Executions,
        Emails,
        AiQueries,
        Webhooks,
    ]
    .into_iter()
    .zip(row)
    .collect()
}
