use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use crate::alerts::service::day_start;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CleanupSummary {
    pub deleted_count: u64,
}

/// Start of the UTC day `retention_days` before `now`.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
    day_start(now) - Duration::days(retention_days)
}

/// key: usage-retention -> delete synced records past the retention window
pub async fn cleanup_old_records(
    pool: &PgPool,
    now: DateTime<Utc>,
    retention_days: i64,
) -> Result<CleanupSummary> {
    let cutoff = retention_cutoff(now, retention_days);
    let deleted = sqlx::query("DELETE FROM usage_records WHERE synced = TRUE AND created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    info!(deleted_count = deleted, %cutoff, "usage retention cleanup complete");
    Ok(CleanupSummary {
        deleted_count: deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_is_midnight_thirty_days_back() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 17, 20, 0).unwrap();
        assert_eq!(
            retention_cutoff(now, 30),
            Utc.with_ymd_and_hms(2026, 9, 18, 0, 0, 0).unwrap()
        );
    }
}
