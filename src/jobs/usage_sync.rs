use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::central::UsageRow;
use crate::context::AppContext;
use crate::metering::UsageRecord;

pub const SYNC_BATCH_LIMIT: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSyncOutcome {
    pub success: bool,
    pub synced_count: u64,
    pub message: String,
}

impl UsageSyncOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_count: 0,
            message: message.into(),
        }
    }
}

/// key: usage-sync -> report aggregated records upstream, mark on success
pub async fn sync_usage_to_central(ctx: &AppContext, now: DateTime<Utc>) -> Result<UsageSyncOutcome> {
    let settings = ctx.settings.load().await?;
    let Some(license_key) = settings.license_key() else {
        return Ok(UsageSyncOutcome::failed("No license key configured"));
    };

    let records = sqlx::query_as::<_, UsageRecord>(
        r#"
        SELECT *
        FROM usage_records
        WHERE aggregated = TRUE AND synced = FALSE
        ORDER BY period_start ASC
        LIMIT $1
        "#,
    )
    .bind(SYNC_BATCH_LIMIT)
    .fetch_all(&ctx.pool)
    .await?;

    if records.is_empty() {
        return Ok(UsageSyncOutcome {
            success: true,
            synced_count: 0,
            message: "No records to sync".to_string(),
        });
    }

    let rows: Vec<UsageRow> = records
        .iter()
        .map(|record| {
            UsageRow::new(
                record.resource.clone(),
                record.quantity,
                record.period_start,
                record.period_end,
            )
        })
        .collect();

    let client = ctx.central_client(&settings)?;
    let response = client.report_usage(license_key, &rows).await;
    if !response.success {
        error!(message = %response.message, records = rows.len(), "usage sync rejected");
        return Ok(UsageSyncOutcome::failed(response.message));
    }

    let ids: Vec<Uuid> = records.iter().map(|record| record.id).collect();
    let marked = sqlx::query(
        "UPDATE usage_records SET synced = TRUE, synced_at = $2 WHERE id = ANY($1) AND synced = FALSE",
    )
    .bind(&ids)
    .bind(now)
    .execute(&ctx.pool)
    .await?
    .rows_affected();

    ctx.settings.record_usage_sync().await;
    info!(synced_count = marked, accepted = response.accepted, "usage synced to central API");

    Ok(UsageSyncOutcome {
        success: true,
        synced_count: marked,
        message: format!("Synced {marked} records"),
    })
}
