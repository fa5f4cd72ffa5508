use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::metering::{overage_rate, usage_percentage, OverageEstimate};
use crate::resources::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Warning,
    Exceeded,
    Blocked,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Warning => "Warning",
            AlertKind::Exceeded => "Exceeded",
            AlertKind::Blocked => "Blocked",
        }
    }

    pub fn carries_overage(&self) -> bool {
        matches!(self, AlertKind::Exceeded | AlertKind::Blocked)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Warning" => Ok(AlertKind::Warning),
            "Exceeded" => Ok(AlertKind::Exceeded),
            "Blocked" => Ok(AlertKind::Blocked),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

/// key: usage-alert-model -> threshold crossing raised for an operator
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UsageAlert {
    pub id: Uuid,
    pub resource: String,
    pub alert_type: String,
    pub threshold_percent: f64,
    pub current_usage: f64,
    pub limit_value: f64,
    pub usage_percent: f64,
    pub overage_amount: Option<f64>,
    pub overage_rate: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub notification_sent: bool,
    pub email_sent_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageAlert {
    pub fn kind(&self) -> Option<AlertKind> {
        self.alert_type.parse().ok()
    }
}

/// Values computed from usage and limit whenever an alert is written.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertFigures {
    pub usage_percent: f64,
    pub overage_amount: Option<f64>,
    pub overage_rate: Option<String>,
}

pub fn derive_figures(
    resource: ResourceKind,
    kind: AlertKind,
    current: f64,
    limit: f64,
) -> AlertFigures {
    let usage_percent = if limit > 0.0 {
        usage_percentage(current, limit)
    } else {
        0.0
    };

    let mut figures = AlertFigures {
        usage_percent,
        overage_amount: None,
        overage_rate: None,
    };

    if kind.carries_overage() && limit > 0.0 && current > limit {
        let estimate = OverageEstimate::compute(resource, current, limit);
        figures.overage_amount = Some(estimate.overage_cost);
        figures.overage_rate = Some(overage_rate(resource).label());
    }

    figures
}
