use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{derive_figures, AlertKind, UsageAlert};
use super::notifier::{alert_body, alert_subject, AlertNotifier, NotifyError};
use crate::resources::ResourceKind;
use crate::settings::SettingsStore;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

const ALERT_COLUMNS: &str = r#"
    id,
    resource,
    alert_type,
    threshold_percent,
    current_usage,
    limit_value,
    usage_percent,
    overage_amount,
    overage_rate,
    acknowledged,
    acknowledged_by,
    acknowledged_at,
    notification_sent,
    email_sent_to,
    created_at,
    updated_at
"#;

/// Midnight UTC of `now`'s calendar day.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| now.naive_utc());
    Utc.from_utc_datetime(&midnight)
}

/// key: alert-issuer -> deduplicated alert writes and one-shot notifications
#[derive(Clone)]
pub struct AlertService {
    pool: PgPool,
    settings: SettingsStore,
    notifier: Arc<dyn AlertNotifier>,
}

impl AlertService {
    pub fn new(pool: PgPool, settings: SettingsStore, notifier: Arc<dyn AlertNotifier>) -> Self {
        Self {
            pool,
            settings,
            notifier,
        }
    }

    /// Raises an alert, folding repeats of the same (resource, kind) on the
    /// same UTC day into the open alert.
    pub async fn create_alert(
        &self,
        resource: ResourceKind,
        kind: AlertKind,
        current: f64,
        limit: f64,
        notify: bool,
    ) -> Result<UsageAlert, AlertError> {
        let settings = self.settings.load().await?;
        let threshold = match kind {
            AlertKind::Warning => settings.warning_threshold,
            AlertKind::Exceeded | AlertKind::Blocked => settings.hard_limit_threshold,
        };
        let figures = derive_figures(resource, kind, current, limit);

        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM usage_alerts
            WHERE resource = $1
              AND alert_type = $2
              AND acknowledged = FALSE
              AND created_at >= $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(resource.as_str())
        .bind(kind.as_str())
        .bind(day_start(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = existing {
            let alert = sqlx::query_as::<_, UsageAlert>(&format!(
                r#"
                UPDATE usage_alerts
                SET current_usage = $2,
                    usage_percent = $3,
                    overage_amount = $4,
                    overage_rate = $5,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {ALERT_COLUMNS}
                "#
            ))
            .bind(id)
            .bind(current)
            .bind(figures.usage_percent)
            .bind(figures.overage_amount)
            .bind(&figures.overage_rate)
            .fetch_one(&self.pool)
            .await?;

            debug!(%id, %resource, %kind, current, "refreshed open usage alert");
            return Ok(alert);
        }

        let alert = sqlx::query_as::<_, UsageAlert>(&format!(
            r#"
            INSERT INTO usage_alerts (
                id,
                resource,
                alert_type,
                threshold_percent,
                current_usage,
                limit_value,
                usage_percent,
                overage_amount,
                overage_rate
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(resource.as_str())
        .bind(kind.as_str())
        .bind(threshold)
        .bind(current)
        .bind(limit)
        .bind(figures.usage_percent)
        .bind(figures.overage_amount)
        .bind(&figures.overage_rate)
        .fetch_one(&self.pool)
        .await?;

        info!(id = %alert.id, %resource, %kind, current, limit, "usage alert raised");

        if notify {
            return Ok(self.send_notification(alert).await);
        }
        Ok(alert)
    }

    /// Emails the alert once. Failures are logged and the alert is returned
    /// unchanged.
    pub async fn send_notification(&self, alert: UsageAlert) -> UsageAlert {
        if alert.notification_sent {
            return alert;
        }

        let settings = match self.settings.load().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(?err, id = %alert.id, "failed to load settings for alert notification");
                return alert;
            }
        };
        if !settings.send_alert_emails {
            return alert;
        }
        let Some(recipient) = settings.alert_recipient() else {
            return alert;
        };

        let subject = alert_subject(&alert);
        let body = alert_body(&alert);
        match self.notifier.send(recipient, &subject, &body).await {
            Ok(()) => {}
            Err(NotifyError::Disabled) => {
                warn!(id = %alert.id, "alert emails enabled but no SMTP relay is configured");
                return alert;
            }
            Err(err) => {
                warn!(error = %err, id = %alert.id, "failed to send usage alert email");
                return alert;
            }
        }

        let marked = sqlx::query_as::<_, UsageAlert>(&format!(
            r#"
            UPDATE usage_alerts
            SET notification_sent = TRUE,
                email_sent_to = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(alert.id)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await;

        match marked {
            Ok(updated) => updated,
            Err(err) => {
                warn!(?err, id = %alert.id, "alert email sent but flag not stored");
                alert
            }
        }
    }

    pub async fn acknowledge(&self, id: Uuid, user: &str) -> Result<UsageAlert, AlertError> {
        let alert = sqlx::query_as::<_, UsageAlert>(&format!(
            r#"
            UPDATE usage_alerts
            SET acknowledged = TRUE,
                acknowledged_by = $2,
                acknowledged_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AlertError::NotFound)?;

        info!(%id, %user, "usage alert acknowledged");
        Ok(alert)
    }

    /// Unacknowledged alerts, newest first.
    pub async fn pending(&self) -> Result<Vec<UsageAlert>, AlertError> {
        let alerts = sqlx::query_as::<_, UsageAlert>(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM usage_alerts
            WHERE acknowledged = FALSE
            ORDER BY created_at DESC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    pub async fn pending_count(&self) -> Result<i64, AlertError> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM usage_alerts WHERE acknowledged = FALSE")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
