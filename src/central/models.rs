use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Timestamp layout the central service expects for period bounds.
pub const PERIOD_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// key: central-wire-license -> license payload returned by the billing service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLicense {
    #[serde(default, deserialize_with = "lenient_string")]
    pub customer_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tier: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub resource_limits: Value,
    #[serde(default, deserialize_with = "lenient_list")]
    pub enabled_features: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub enabled_apps: Vec<String>,
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Strings, numbers and booleans become text; anything else is absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_to_string(Value::deserialize(deserializer)?))
}

/// `null` is an empty list; non-text entries are stringified or skipped.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(items
        .unwrap_or_default()
        .into_iter()
        .filter_map(scalar_to_string)
        .collect())
}

impl RemoteLicense {
    pub fn expiry(&self) -> Option<NaiveDate> {
        let raw = self.expiry_date.as_deref()?.trim();
        // Accept both plain dates and full timestamps.
        let date_part = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseValidation {
    pub valid: bool,
    pub license: Option<Value>,
    pub message: String,
}

/// key: central-wire-usage -> one aggregated usage row reported upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    pub resource: String,
    pub quantity: f64,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
}

impl UsageRow {
    pub fn new(
        resource: impl Into<String>,
        quantity: f64,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            resource: resource.into(),
            quantity,
            period_start: period_start.map(|at| at.format(PERIOD_FORMAT).to_string()),
            period_end: period_end.map(|at| at.format(PERIOD_FORMAT).to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportUsageResponse {
    pub success: bool,
    pub accepted: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteInfo {
    pub service: String,
    pub version: String,
    pub tier: Option<String>,
    pub enabled_apps: Vec<String>,
    pub pending_alerts: i64,
    pub reported_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    pub commands: Vec<Value>,
}
