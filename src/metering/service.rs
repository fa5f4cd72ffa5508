use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

use super::limits::{evaluate_limit, usage_percentage};
use super::models::{LimitStatus, NewUsage, ResourceUsage};
use super::overage::{overage_rate, round_cents, OverageEstimate};
use super::recorder::UsageRecorder;
use crate::license::{LicenseError, LicenseService};
use crate::resources::{ResourceKind, Tier};
use crate::settings::SettingsStore;

/// Midnight UTC on the first day of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_else(|| now.naive_utc());
    Utc.from_utc_datetime(&first)
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub tier: Option<Tier>,
    pub usage: BTreeMap<ResourceKind, ResourceUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceOverage {
    pub current: f64,
    pub limit: f64,
    pub exceeded_by: f64,
    pub overage_cost: f64,
    pub rate: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverageReport {
    pub tier: Option<Tier>,
    pub overages: BTreeMap<ResourceKind, ResourceOverage>,
    pub total_estimated_cost: f64,
}

#[derive(sqlx::FromRow)]
struct ResourceTotal {
    resource: String,
    total: f64,
}

/// key: metering-service -> month-to-date usage against license limits
#[derive(Clone)]
pub struct MeteringService {
    pool: PgPool,
    license: LicenseService,
    settings: SettingsStore,
    recorder: UsageRecorder,
}

impl MeteringService {
    pub fn new(
        pool: PgPool,
        license: LicenseService,
        settings: SettingsStore,
        recorder: UsageRecorder,
    ) -> Self {
        Self {
            pool,
            license,
            settings,
            recorder,
        }
    }

    pub async fn current_usage(&self, resource: ResourceKind) -> Result<f64, sqlx::Error> {
        let total: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT SUM(quantity)
            FROM usage_records
            WHERE resource = $1 AND recorded_at >= $2
            "#,
        )
        .bind(resource.as_str())
        .bind(month_start(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0.0))
    }

    /// Month-to-date totals for every resource kind, zero filled.
    pub async fn all_usage(&self) -> Result<BTreeMap<ResourceKind, f64>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ResourceTotal>(
            r#"
            SELECT resource, COALESCE(SUM(quantity), 0)::DOUBLE PRECISION AS total
            FROM usage_records
            WHERE recorded_at >= $1
            GROUP BY resource
            "#,
        )
        .bind(month_start(Utc::now()))
        .fetch_all(&self.pool)
        .await?;

        let mut usage: BTreeMap<ResourceKind, f64> =
            ResourceKind::ALL.iter().map(|kind| (*kind, 0.0)).collect();
        for row in rows {
            match row.resource.parse::<ResourceKind>() {
                Ok(kind) => {
                    usage.insert(kind, row.total);
                }
                Err(err) => warn!(%err, "skipping usage for unknown resource"),
            }
        }
        Ok(usage)
    }

    pub async fn check_limits(&self, resource: ResourceKind) -> Result<LimitStatus, sqlx::Error> {
        let limit = self.license.get_resource_limit(resource).await?;
        if limit == 0.0 {
            return Ok(LimitStatus::Ok);
        }
        let current = self.current_usage(resource).await?;
        let thresholds = self.settings.load().await?.thresholds();
        Ok(evaluate_limit(current, limit, thresholds))
    }

    pub async fn usage_percentage(&self, resource: ResourceKind) -> Result<f64, sqlx::Error> {
        let limit = self.license.get_resource_limit(resource).await?;
        if limit == 0.0 {
            return Ok(0.0);
        }
        let current = self.current_usage(resource).await?;
        Ok(usage_percentage(current, limit))
    }

    pub async fn calculate_overage(
        &self,
        resource: ResourceKind,
    ) -> Result<OverageEstimate, sqlx::Error> {
        let limit = self.license.get_resource_limit(resource).await?;
        if limit == 0.0 {
            return Ok(OverageEstimate::NONE);
        }
        let current = self.current_usage(resource).await?;
        Ok(OverageEstimate::compute(resource, current, limit))
    }

    pub async fn usage_summary(&self) -> Result<UsageSummary, sqlx::Error> {
        let license = self.license.get_license().await?;
        let thresholds = self.settings.load().await?.thresholds();
        let totals = self.all_usage().await?;

        let usage = totals
            .into_iter()
            .map(|(resource, current)| {
                let limit = license
                    .as_ref()
                    .map(|license| license.limit(resource))
                    .unwrap_or(0.0);
                let entry = ResourceUsage {
                    current,
                    limit,
                    percentage: round_tenths(usage_percentage(current, limit)),
                    status: evaluate_limit(current, limit, thresholds),
                    unlimited: limit == 0.0,
                };
                (resource, entry)
            })
            .collect();

        Ok(UsageSummary {
            tier: license.map(|license| license.tier),
            usage,
        })
    }

    /// Estimated charges for every resource currently over its limit.
    pub async fn overage_report(&self) -> Result<OverageReport, sqlx::Error> {
        let license = self.license.get_license().await?;
        let totals = self.all_usage().await?;

        let mut overages = BTreeMap::new();
        let mut total = 0.0;
        for (resource, current) in totals {
            let limit = license
                .as_ref()
                .map(|license| license.limit(resource))
                .unwrap_or(0.0);
            let estimate = OverageEstimate::compute(resource, current, limit);
            if estimate.exceeded_by <= 0.0 {
                continue;
            }
            total += estimate.overage_cost;
            overages.insert(
                resource,
                ResourceOverage {
                    current,
                    limit,
                    exceeded_by: estimate.exceeded_by,
                    overage_cost: estimate.overage_cost,
                    rate: overage_rate(resource).label(),
                },
            );
        }

        Ok(OverageReport {
            tier: license.map(|license| license.tier),
            overages,
            total_estimated_cost: round_cents(total),
        })
    }

    /// Runs `action` unless `resource` is exceeded and blocking is enabled,
    /// then records `quantity` once the action succeeds.
    pub async fn guard_quota<Fut, T, E>(
        &self,
        resource: ResourceKind,
        quantity: f64,
        action: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<LicenseError>,
    {
        let status = self
            .check_limits(resource)
            .await
            .map_err(|err| E::from(LicenseError::from(err)))?;
        if status == LimitStatus::Exceeded {
            let block = self
                .settings
                .load()
                .await
                .map_err(|err| E::from(LicenseError::from(err)))?
                .block_on_exceeded;
            if block {
                return Err(E::from(LicenseError::QuotaExceeded { resource }));
            }
        }

        let value = action.await?;
        self.recorder.record(NewUsage::new(resource, quantity)).await;
        Ok(value)
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
