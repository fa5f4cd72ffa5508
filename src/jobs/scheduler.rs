use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info, warn};

use super::{
    aggregate_usage, check_all_limits, cleanup_old_records, send_heartbeat, sync_license,
    sync_usage_to_central,
};
use crate::config;
use crate::context::AppContext;

const HOURLY: Duration = Duration::from_secs(60 * 60);
const DAILY: Duration = Duration::from_secs(24 * 60 * 60);

/// key: metering-scheduler -> hourly sync/aggregation and daily retention
pub fn spawn(ctx: AppContext) {
    let hourly_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut ticker = time::interval(HOURLY);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            run_hourly(&hourly_ctx, Utc::now()).await;
        }
    });

    let retention_days = *config::RETENTION_DAYS;
    tokio::spawn(async move {
        let mut ticker = time::interval(DAILY);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(err) = cleanup_old_records(&ctx.pool, Utc::now(), retention_days).await {
                warn!(?err, "usage retention tick failed");
            }
        }
    });
}

/// key: metering-scheduler -> hourly tick handler
///
/// Each job runs regardless of whether an earlier one failed.
pub async fn run_hourly(ctx: &AppContext, now: DateTime<Utc>) {
    log_outcome("license sync", sync_license(ctx).await.map(|outcome| {
        if !outcome.success {
            warn!(message = %outcome.message, "license sync did not complete");
        }
    }));
    log_outcome(
        "usage aggregation",
        aggregate_usage(&ctx.pool, now).await.map(drop),
    );
    log_outcome(
        "usage sync",
        sync_usage_to_central(ctx, now).await.map(|outcome| {
            if !outcome.success {
                warn!(message = %outcome.message, "usage sync did not complete");
            }
        }),
    );
    log_outcome("limit check", check_all_limits(ctx).await.map(drop));
    log_outcome(
        "heartbeat",
        send_heartbeat(ctx, now).await.map(|summary| {
            info!(
                acknowledged = summary.acknowledged,
                commands_executed = summary.commands_executed,
                "heartbeat sent"
            );
        }),
    );
}

fn log_outcome(job: &'static str, result: Result<()>) {
    if let Err(err) = result {
        warn!(?err, job, "scheduled metering job failed");
    }
}
