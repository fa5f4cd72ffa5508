use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::alerts::AlertKind;
use crate::context::AppContext;
use crate::metering::{evaluate_limit, LimitStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LimitCheckSummary {
    pub alerts_created: u32,
    pub resources_checked: u32,
}

/// key: limit-sweep -> raise alerts for every limited resource over threshold
pub async fn check_all_limits(ctx: &AppContext) -> Result<LimitCheckSummary> {
    let Some(license) = ctx.license.get_license().await? else {
        return Ok(LimitCheckSummary::default());
    };
    let thresholds = ctx.settings.load().await?.thresholds();

    let mut summary = LimitCheckSummary::default();
    for (resource, limit) in license.resource_limits.iter() {
        summary.resources_checked += 1;
        if limit == 0.0 {
            continue;
        }

        let current = ctx.metering.current_usage(resource).await?;
        let kind = match evaluate_limit(current, limit, thresholds) {
            LimitStatus::Exceeded => AlertKind::Exceeded,
            LimitStatus::Warning => AlertKind::Warning,
            LimitStatus::Ok => continue,
        };

        match ctx
            .alerts
            .create_alert(resource, kind, current, limit, true)
            .await
        {
            Ok(_) => summary.alerts_created += 1,
            Err(err) => warn!(?err, %resource, %kind, "failed to raise usage alert"),
        }
    }

    info!(
        alerts_created = summary.alerts_created,
        resources_checked = summary.resources_checked,
        "limit check complete"
    );
    Ok(summary)
}
