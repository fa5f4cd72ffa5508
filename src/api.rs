use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::alerts::UsageAlert;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::jobs;
use crate::license::LicenseSyncOutcome;
use crate::metering::NewUsage;
use crate::resources::ResourceKind;
use crate::settings::MeteringSettings;

const NO_LICENSE: &str = "No license configured";
const SECRET_MASK: &str = "********";

fn no_license() -> Json<Value> {
    Json(json!({ "success": false, "message": NO_LICENSE }))
}

/// key: metering-api -> license info for the dashboard
pub async fn get_license_info(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<Value>> {
    let Some(license) = ctx.license.get_license().await? else {
        return Ok(no_license());
    };

    Ok(Json(json!({
        "success": true,
        "license": {
            "tier": license.tier,
            "status": license.status,
            "is_valid": license.is_valid(),
            "expiry_date": license.expiry_date,
            "enabled_features": license.enabled_features,
            "enabled_apps": license.enabled_apps,
            "resource_limits": license.resource_limits,
        }
    })))
}

pub async fn get_usage_summary(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<Value>> {
    let summary = ctx.metering.usage_summary().await?;
    let Some(tier) = summary.tier else {
        return Ok(no_license());
    };

    Ok(Json(json!({
        "success": true,
        "tier": tier,
        "usage": summary.usage,
    })))
}

pub async fn sync_now(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<LicenseSyncOutcome>> {
    Ok(Json(jobs::sync_license(&ctx).await?))
}

#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub licensed: bool,
    pub tier: Option<String>,
}

pub async fn check_feature(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
    Path(feature): Path<String>,
) -> AppResult<Json<EntitlementResponse>> {
    Ok(Json(EntitlementResponse {
        licensed: ctx.license.is_licensed(Some(&feature), None).await?,
        tier: ctx.license.get_license_tier().await?.map(|tier| tier.to_string()),
    }))
}

pub async fn check_app(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
    Path(app): Path<String>,
) -> AppResult<Json<EntitlementResponse>> {
    Ok(Json(EntitlementResponse {
        licensed: ctx.license.is_licensed(None, Some(&app)).await?,
        tier: ctx.license.get_license_tier().await?.map(|tier| tier.to_string()),
    }))
}

pub async fn get_overage_estimate(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<Value>> {
    let report = ctx.metering.overage_report().await?;
    let Some(tier) = report.tier else {
        return Ok(no_license());
    };

    Ok(Json(json!({
        "success": true,
        "tier": tier,
        "overages": report.overages,
        "total_estimated_cost": report.total_estimated_cost,
    })))
}

pub async fn acknowledge_alert(
    user: AuthUser,
    Extension(ctx): Extension<AppContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    ctx.alerts.acknowledge(id, &user.subject).await?;
    Ok(Json(json!({ "success": true, "message": "Alert acknowledged" })))
}

#[derive(Debug, Serialize)]
pub struct Entitlements {
    pub success: bool,
    pub features: Vec<String>,
    pub apps: Vec<String>,
}

pub async fn get_entitlements(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<Entitlements>> {
    Ok(Json(Entitlements {
        success: true,
        features: ctx.license.get_enabled_features().await?.into_iter().collect(),
        apps: ctx.license.get_enabled_apps().await?.into_iter().collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct PendingAlerts {
    pub success: bool,
    pub alerts: Vec<UsageAlert>,
    pub count: usize,
}

pub async fn get_pending_alerts(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<PendingAlerts>> {
    let alerts = ctx.alerts.pending().await?;
    Ok(Json(PendingAlerts {
        success: true,
        count: alerts.len(),
        alerts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    pub resource: ResourceKind,
    pub quantity: f64,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub reference_type: Option<String>,
    #[serde(default)]
    pub reference_name: Option<String>,
}

pub async fn record_usage(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
    Json(payload): Json<RecordUsageRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if !payload.quantity.is_finite() || payload.quantity < 0.0 {
        return Err(AppError::BadRequest(
            "quantity must be a non-negative number".to_string(),
        ));
    }

    let mut usage = NewUsage::new(payload.resource, payload.quantity);
    usage.app_name = payload.app_name;
    usage.reference_type = payload.reference_type;
    usage.reference_name = payload.reference_name;
    ctx.recorder.record(usage).await;

    Ok(accepted())
}

fn accepted() -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "message": "Usage accepted" })),
    )
}

#[derive(Debug, Deserialize)]
pub struct FileUploadRequest {
    pub file_name: String,
    pub size_bytes: i64,
}

/// Stands in for the file-upload hook of the host application.
pub async fn record_file_upload(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
    Json(payload): Json<FileUploadRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if payload.size_bytes < 0 {
        return Err(AppError::BadRequest(
            "size_bytes must be non-negative".to_string(),
        ));
    }
    ctx.recorder
        .track_file_upload(payload.size_bytes, &payload.file_name)
        .await;
    Ok(accepted())
}

#[derive(Debug, Deserialize)]
pub struct EmailQueuedRequest {
    pub email_name: String,
}

pub async fn record_email_queued(
    _user: AuthUser,
    Extension(ctx): Extension<AppContext>,
    Json(payload): Json<EmailQueuedRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if payload.email_name.trim().is_empty() {
        return Err(AppError::BadRequest("email_name is required".to_string()));
    }
    ctx.recorder.track_email_queued(&payload.email_name).await;
    Ok(accepted())
}

fn masked(mut settings: MeteringSettings) -> MeteringSettings {
    if settings.api_secret.as_deref().is_some_and(|secret| !secret.is_empty()) {
        settings.api_secret = Some(SECRET_MASK.to_string());
    }
    settings
}

pub async fn get_settings(
    user: AuthUser,
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<MeteringSettings>> {
    if !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(Json(masked(ctx.settings.load().await?)))
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub central_api_url: Option<String>,
    pub license_key: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub warning_threshold: Option<f64>,
    pub hard_limit_threshold: Option<f64>,
    pub sync_interval_hours: Option<i32>,
    pub cache_ttl_seconds: Option<i32>,
    pub use_cache: Option<bool>,
    pub block_on_exceeded: Option<bool>,
    pub send_alert_emails: Option<bool>,
    pub alert_email: Option<String>,
}

impl SettingsUpdate {
    pub fn apply(self, settings: &mut MeteringSettings) {
        if let Some(url) = self.central_api_url {
            settings.central_api_url = url;
        }
        if let Some(key) = self.license_key {
            settings.license_key = Some(key);
        }
        if let Some(key) = self.api_key {
            settings.api_key = Some(key);
        }
        // Echoing the mask back must not overwrite the stored secret.
        if let Some(secret) = self.api_secret.filter(|secret| secret != SECRET_MASK) {
            settings.api_secret = Some(secret);
        }
        if let Some(value) = self.warning_threshold {
            settings.warning_threshold = value;
        }
        if let Some(value) = self.hard_limit_threshold {
            settings.hard_limit_threshold = value;
        }
        if let Some(value) = self.sync_interval_hours {
            settings.sync_interval_hours = value;
        }
        if let Some(value) = self.cache_ttl_seconds {
            settings.cache_ttl_seconds = value;
        }
        if let Some(value) = self.use_cache {
            settings.use_cache = value;
        }
        if let Some(value) = self.block_on_exceeded {
            settings.block_on_exceeded = value;
        }
        if let Some(value) = self.send_alert_emails {
            settings.send_alert_emails = value;
        }
        if let Some(email) = self.alert_email {
            settings.alert_email = Some(email);
        }
    }
}

pub async fn update_settings(
    user: AuthUser,
    Extension(ctx): Extension<AppContext>,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<MeteringSettings>> {
    if !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    let mut settings = ctx.settings.load().await?;
    update.apply(&mut settings);
    settings.validate()?;
    ctx.settings.save(&settings).await?;
    tracing::info!(subject = %user.subject, "metering settings updated");

    Ok(Json(masked(ctx.settings.load().await?)))
}
