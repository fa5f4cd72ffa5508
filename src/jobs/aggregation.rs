use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationSummary {
    pub aggregated_count: u64,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PendingRecord {
    pub id: Uuid,
    pub resource: String,
    pub quantity: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Records sharing a resource and an hour.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageBucket {
    pub resource: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub quantity: f64,
    pub record_ids: Vec<Uuid>,
}

pub fn hour_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::hours(1)).unwrap_or(at)
}

/// key: usage-aggregation -> group records into (resource, hour) buckets
pub fn group_into_buckets(records: &[PendingRecord]) -> Vec<UsageBucket> {
    let mut buckets: BTreeMap<(String, DateTime<Utc>), UsageBucket> = BTreeMap::new();
    for record in records {
        let period_start = hour_floor(record.recorded_at);
        let bucket = buckets
            .entry((record.resource.clone(), period_start))
            .or_insert_with(|| UsageBucket {
                resource: record.resource.clone(),
                period_start,
                period_end: period_start + Duration::hours(1),
                quantity: 0.0,
                record_ids: Vec::new(),
            });
        bucket.quantity += record.quantity;
        bucket.record_ids.push(record.id);
    }
    buckets.into_values().collect()
}

/// Stamps every unaggregated record with its hour bucket.
pub async fn aggregate_usage(pool: &PgPool, now: DateTime<Utc>) -> Result<AggregationSummary> {
    let records = sqlx::query_as::<_, PendingRecord>(
        r#"
        SELECT id, resource, quantity, recorded_at
        FROM usage_records
        WHERE aggregated = FALSE
        ORDER BY recorded_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    if records.is_empty() {
        return Ok(AggregationSummary::default());
    }

    let mut summary = AggregationSummary::default();
    for bucket in group_into_buckets(&records) {
        let result = sqlx::query(
            r#"
            UPDATE usage_records
            SET aggregated = TRUE,
                aggregated_at = $2,
                period_start = $3,
                period_end = $4
            WHERE id = ANY($1) AND aggregated = FALSE
            "#,
        )
        .bind(&bucket.record_ids)
        .bind(now)
        .bind(bucket.period_start)
        .bind(bucket.period_end)
        .execute(pool)
        .await;

        match result {
            Ok(done) => {
                debug!(
                    resource = %bucket.resource,
                    period_start = %bucket.period_start,
                    quantity = bucket.quantity,
                    records = done.rows_affected(),
                    "aggregated usage bucket"
                );
                summary.aggregated_count += done.rows_affected();
                if !summary.resources.contains(&bucket.resource) {
                    summary.resources.push(bucket.resource);
                }
            }
            Err(err) => warn!(
                ?err,
                resource = %bucket.resource,
                period_start = %bucket.period_start,
                "failed to aggregate usage bucket"
            ),
        }
    }

    info!(
        aggregated_count = summary.aggregated_count,
        resources = summary.resources.len(),
        "usage aggregation complete"
    );
    Ok(summary)
}
