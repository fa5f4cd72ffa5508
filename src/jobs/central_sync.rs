use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::usage_sync::sync_usage_to_central;
use crate::central::{models::PERIOD_FORMAT, SiteInfo};
use crate::context::AppContext;
use crate::license::LicenseSyncOutcome;

pub const SERVICE_NAME: &str = "meterd";

/// Pulls the license from the central service using the stored settings.
pub async fn sync_license(ctx: &AppContext) -> Result<LicenseSyncOutcome> {
    let settings = ctx.settings.load().await?;
    let client = ctx.central_client(&settings)?;
    Ok(ctx.license.sync_license(&client).await)
}

/// Instructions the central service may piggyback on a heartbeat reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    SyncLicense,
    SyncUsage,
    Unknown(String),
}

impl RemoteCommand {
    /// Accepts either a bare string or an object with a `command` field.
    pub fn parse(value: &Value) -> Self {
        let name = match value {
            Value::String(name) => name.as_str(),
            Value::Object(map) => map.get("command").and_then(Value::as_str).unwrap_or(""),
            _ => "",
        };
        match name {
            "sync_license" => RemoteCommand::SyncLicense,
            "sync_usage" => RemoteCommand::SyncUsage,
            _ => RemoteCommand::Unknown(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeartbeatSummary {
    pub acknowledged: bool,
    pub commands_executed: u32,
}

/// key: heartbeat -> report liveness upstream and run returned commands
pub async fn send_heartbeat(ctx: &AppContext, now: DateTime<Utc>) -> Result<HeartbeatSummary> {
    let settings = ctx.settings.load().await?;
    let Some(license_key) = settings.license_key() else {
        return Ok(HeartbeatSummary::default());
    };

    let pending_alerts = match ctx.alerts.pending_count().await {
        Ok(count) => count,
        Err(err) => {
            warn!(?err, "failed to count pending alerts for heartbeat");
            0
        }
    };
    let site_info = SiteInfo {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tier: ctx.license.get_license_tier().await?.map(|tier| tier.to_string()),
        enabled_apps: ctx.license.get_enabled_apps().await?.into_iter().collect(),
        pending_alerts,
        reported_at: now.format(PERIOD_FORMAT).to_string(),
    };

    let client = ctx.central_client(&settings)?;
    let response = client.heartbeat(license_key, &site_info).await;

    let mut summary = HeartbeatSummary {
        acknowledged: response.acknowledged,
        commands_executed: 0,
    };
    for command in response.commands.iter().map(RemoteCommand::parse) {
        match command {
            RemoteCommand::SyncLicense => {
                let outcome = ctx.license.sync_license(&client).await;
                info!(success = outcome.success, message = %outcome.message, "license sync requested by central API");
                summary.commands_executed += 1;
            }
            RemoteCommand::SyncUsage => match sync_usage_to_central(ctx, now).await {
                Ok(outcome) => {
                    info!(success = outcome.success, synced_count = outcome.synced_count, "usage sync requested by central API");
                    summary.commands_executed += 1;
                }
                Err(err) => warn!(?err, "usage sync requested by central API failed"),
            },
            RemoteCommand::Unknown(raw) => {
                warn!(command = %raw, "ignoring unknown heartbeat command");
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_parse_from_strings_and_objects() {
        assert_eq!(RemoteCommand::parse(&json!("sync_license")), RemoteCommand::SyncLicense);
        assert_eq!(
            RemoteCommand::parse(&json!({"command": "sync_usage"})),
            RemoteCommand::SyncUsage
        );
        assert!(matches!(
            RemoteCommand::parse(&json!({"command": "reboot"})),
            RemoteCommand::Unknown(_)
        ));
        assert!(matches!(RemoteCommand::parse(&json!(42)), RemoteCommand::Unknown(_)));
    }
}
