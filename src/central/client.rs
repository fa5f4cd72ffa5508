use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::models::{
    HeartbeatResponse, LicenseValidation, RemoteLicense, ReportUsageResponse, SiteInfo, UsageRow,
};
use super::signing::{canonical_json, generate_signature, spaced_json};
use crate::settings::MeteringSettings;

pub const VALIDATE_LICENSE_ENDPOINT: &str = "method/simbotix.api.licensing.validate_license";
pub const LICENSE_DETAILS_ENDPOINT: &str = "method/simbotix.api.licensing.get_license_details";
pub const REPORT_USAGE_ENDPOINT: &str = "method/simbotix.api.metering.report_usage";
pub const HEARTBEAT_ENDPOINT: &str = "method/simbotix.api.heartbeat.ping";

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const SIGNATURE_HEADER: &str = "X-Api-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Api-Timestamp";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CentralError {
    #[error("Authentication failed")]
    Unauthorized,
    #[error("Access denied")]
    Forbidden,
    #[error("Endpoint not found")]
    NotFound,
    #[error("Request timed out")]
    Timeout,
    #[error("Connection failed")]
    Connection,
    #[error("Invalid JSON response")]
    InvalidJson,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Transport(String),
    #[error("failed to build central API client: {0}")]
    Client(String),
}

impl CentralError {
    /// Client errors that retrying cannot fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CentralError::Unauthorized
                | CentralError::Forbidden
                | CentralError::NotFound
                | CentralError::Client(_)
        )
    }
}

impl From<reqwest::Error> for CentralError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CentralError::Timeout
        } else if err.is_connect() {
            CentralError::Connection
        } else if err.is_decode() {
            CentralError::InvalidJson
        } else {
            CentralError::Transport(err.to_string())
        }
    }
}

/// key: central-retry-policy -> bounded attempts with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2_u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }
}

/// key: central-client -> signed, retried calls to the billing service
#[derive(Clone)]
pub struct CentralClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    retry: RetryPolicy,
}

impl CentralClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Result<Self, CentralError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| CentralError::Client(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            api_secret: api_secret.filter(|secret| !secret.is_empty()),
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_settings(settings: &MeteringSettings) -> Result<Self, CentralError> {
        Self::new(
            settings.central_api_url.clone(),
            settings.api_key.clone(),
            settings.api_secret().map(str::to_string),
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn sign(&self, payload: &str) -> String {
        generate_signature(self.api_secret.as_deref().unwrap_or_default(), payload)
    }

    pub async fn validate_license(&self, license_key: &str) -> LicenseValidation {
        let payload = json!({ "license_key": license_key });
        match self.post(VALIDATE_LICENSE_ENDPOINT, &payload).await {
            Ok(result) if is_success(&result) => LicenseValidation {
                valid: true,
                license: Some(result.get("license").cloned().unwrap_or_else(|| json!({}))),
                message: message_or(&result, "License is valid"),
            },
            Ok(result) => LicenseValidation {
                valid: false,
                license: None,
                message: message_or(&result, "License validation failed"),
            },
            Err(err) => LicenseValidation {
                valid: false,
                license: None,
                message: err.to_string(),
            },
        }
    }

    /// `Ok(None)` when the service answered without a license payload.
    pub async fn get_license_details(
        &self,
        license_key: &str,
    ) -> Result<Option<RemoteLicense>, CentralError> {
        let payload = json!({ "license_key": license_key });
        let result = self.post(LICENSE_DETAILS_ENDPOINT, &payload).await?;
        if !is_success(&result) {
            debug!(message = %message_or(&result, ""), "central API returned no license details");
            return Ok(None);
        }

        let Some(license) = result.get("license").filter(|value| {
            value.as_object().map(|map| !map.is_empty()).unwrap_or(false)
        }) else {
            return Ok(None);
        };

        serde_json::from_value(license.clone())
            .map(Some)
            .map_err(|_| CentralError::InvalidJson)
    }

    pub async fn report_usage(&self, license_key: &str, rows: &[UsageRow]) -> ReportUsageResponse {
        let usage_data = match spaced_json(rows) {
            Ok(encoded) => encoded,
            Err(err) => {
                return ReportUsageResponse {
                    success: false,
                    accepted: 0,
                    message: format!("failed to encode usage data: {err}"),
                }
            }
        };
        let payload = json!({
            "license_key": license_key,
            "usage_data": usage_data,
        });

        match self.post(REPORT_USAGE_ENDPOINT, &payload).await {
            Ok(result) => ReportUsageResponse {
                success: is_success(&result),
                accepted: result.get("accepted").and_then(Value::as_i64).unwrap_or(0),
                message: message_or(&result, ""),
            },
            Err(err) => ReportUsageResponse {
                success: false,
                accepted: 0,
                message: err.to_string(),
            },
        }
    }

    pub async fn heartbeat(&self, license_key: &str, site_info: &SiteInfo) -> HeartbeatResponse {
        let site_info = spaced_json(site_info).unwrap_or_else(|_| "{}".to_string());
        let payload = json!({
            "license_key": license_key,
            "site_info": site_info,
        });

        match self.post(HEARTBEAT_ENDPOINT, &payload).await {
            Ok(result) => HeartbeatResponse {
                acknowledged: result
                    .get("acknowledged")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                commands: result
                    .get("commands")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            },
            Err(err) => {
                warn!(error = %err, "heartbeat was not acknowledged");
                HeartbeatResponse {
                    acknowledged: false,
                    commands: Vec::new(),
                }
            }
        }
    }

    /// POSTs `payload`, retrying transient failures. The returned value has the
    /// response `message` envelope already unwrapped.
    pub async fn post(&self, endpoint: &str, payload: &Value) -> Result<Value, CentralError> {
        let url = self.endpoint(endpoint);
        let body = canonical_json(payload);

        let has_payload = payload.as_object().map(|map| !map.is_empty()).unwrap_or(false);
        let signature = match &self.api_secret {
            Some(_) if has_payload => {
                Some((self.sign(&body), Utc::now().timestamp().to_string()))
            }
            _ => None,
        };

        let mut last_error = None;
        for attempt in 0..self.retry.max_attempts {
            match self.attempt(&url, &body, signature.as_ref()).await {
                Ok(value) => return Ok(unwrap_message(value)),
                Err(err) if err.is_terminal() => {
                    warn!(%url, error = %err, "central API rejected request");
                    return Err(err);
                }
                Err(err) => {
                    warn!(%url, attempt = attempt + 1, error = %err, "central API attempt failed");
                    last_error = Some(err);
                }
            }

            if attempt + 1 < self.retry.max_attempts {
                sleep(self.retry.delay_for(attempt)).await;
            }
        }

        let err = last_error.unwrap_or_else(|| CentralError::Transport("no attempts made".into()));
        error!(
            %url,
            attempts = self.retry.max_attempts,
            error = %err,
            "central API request failed after retries"
        );
        Err(err)
    }

    async fn attempt(
        &self,
        url: &str,
        body: &str,
        signature: Option<&(String, String)>,
    ) -> Result<Value, CentralError> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, self.api_key.clone().unwrap_or_default())
            .body(body.to_string());

        if let Some((signature, timestamp)) = signature {
            request = request
                .header(SIGNATURE_HEADER, signature.as_str())
                .header(TIMESTAMP_HEADER, timestamp.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => return Err(CentralError::Unauthorized),
            StatusCode::FORBIDDEN => return Err(CentralError::Forbidden),
            StatusCode::NOT_FOUND => return Err(CentralError::NotFound),
            _ => {}
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(CentralError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|_| CentralError::InvalidJson)
    }
}

fn unwrap_message(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("message") => {
            map.remove("message").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn is_success(value: &Value) -> bool {
    value.get("success").and_then(Value::as_bool).unwrap_or(false)
}

fn message_or(value: &Value, fallback: &str) -> String {
    match value {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string(),
    }
}
