use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::resources::ResourceKind;

/// key: usage-record-model -> one observed consumption event
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub resource: String,
    pub quantity: f64,
    pub recorded_at: DateTime<Utc>,
    pub app_name: Option<String>,
    pub reference_type: Option<String>,
    pub reference_name: Option<String>,
    pub aggregated: bool,
    pub aggregated_at: Option<DateTime<Utc>>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUsage {
    pub resource: ResourceKind,
    pub quantity: f64,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub reference_type: Option<String>,
    #[serde(default)]
    pub reference_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl NewUsage {
    pub fn new(resource: ResourceKind, quantity: f64) -> Self {
        Self {
            resource,
            quantity,
            app_name: None,
            reference_type: None,
            reference_name: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn app(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn reference(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.reference_type = Some(kind.into());
        self.reference_name = Some(name.into());
        self
    }

    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }

    /// Zero, negative and non-finite quantities carry no usage.
    pub fn is_meterable(&self) -> bool {
        self.quantity.is_finite() && self.quantity > 0.0
    }
}

/// key: limit-status -> ordered ok < warning < exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitStatus {
    Ok,
    Warning,
    Exceeded,
}

impl LimitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitStatus::Ok => "ok",
            LimitStatus::Warning => "warning",
            LimitStatus::Exceeded => "exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning_percent: f64,
    pub hard_limit_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_percent: 80.0,
            hard_limit_percent: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub current: f64,
    pub limit: f64,
    pub percentage: f64,
    pub status: LimitStatus,
    pub unlimited: bool,
}
