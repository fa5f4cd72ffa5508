use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::warn;

use crate::cache::{TtlCache, LICENSE_KEY, SETTINGS_KEY};
use crate::config;
use crate::metering::Thresholds;

const SETTINGS_CACHE_TTL: Duration = Duration::from_secs(300);

/// key: metering-settings -> single process-wide configuration record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MeteringSettings {
    pub central_api_url: String,
    pub license_key: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub warning_threshold: f64,
    pub hard_limit_threshold: f64,
    pub sync_interval_hours: i32,
    pub cache_ttl_seconds: i32,
    pub use_cache: bool,
    pub block_on_exceeded: bool,
    pub send_alert_emails: bool,
    pub alert_email: Option<String>,
    pub sync_status: Option<String>,
    pub last_license_sync: Option<DateTime<Utc>>,
    pub last_usage_sync: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
}

impl Default for MeteringSettings {
    fn default() -> Self {
        Self {
            central_api_url: config::CENTRAL_API_URL.clone(),
            license_key: None,
            api_key: None,
            api_secret: None,
            warning_threshold: 80.0,
            hard_limit_threshold: 100.0,
            sync_interval_hours: 1,
            cache_ttl_seconds: 300,
            use_cache: true,
            block_on_exceeded: false,
            send_alert_emails: false,
            alert_email: None,
            sync_status: None,
            last_license_sync: None,
            last_usage_sync: None,
            last_sync_error: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("Warning threshold must be less than hard limit threshold")]
    ThresholdOrder,
    #[error("Sync interval must be between 1 and 24 hours")]
    SyncInterval,
    #[error("Cache TTL must be at least 60 seconds")]
    CacheTtl,
    #[error("invalid central API URL: {0}")]
    CentralUrl(String),
}

impl MeteringSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.warning_threshold >= self.hard_limit_threshold {
            return Err(SettingsError::ThresholdOrder);
        }
        if !(1..=24).contains(&self.sync_interval_hours) {
            return Err(SettingsError::SyncInterval);
        }
        if self.cache_ttl_seconds < 60 {
            return Err(SettingsError::CacheTtl);
        }
        url::Url::parse(&self.central_api_url)
            .map_err(|err| SettingsError::CentralUrl(err.to_string()))?;
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            warning_percent: self.warning_threshold,
            hard_limit_percent: self.hard_limit_threshold,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds.max(60) as u64)
    }

    /// Blank credentials are treated as unset.
    pub fn license_key(&self) -> Option<&str> {
        non_blank(self.license_key.as_deref())
    }

    pub fn api_secret(&self) -> Option<&str> {
        non_blank(self.api_secret.as_deref())
    }

    pub fn alert_recipient(&self) -> Option<&str> {
        if !self.send_alert_emails {
            return None;
        }
        non_blank(self.alert_email.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Error)]
pub enum SettingsStoreError {
    #[error(transparent)]
    Invalid(#[from] SettingsError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// key: settings-store -> cached load, validated save
#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
    cache: Arc<TtlCache>,
}

impl SettingsStore {
    pub fn new(pool: PgPool, cache: Arc<TtlCache>) -> Self {
        Self { pool, cache }
    }

    pub async fn load(&self) -> Result<MeteringSettings, sqlx::Error> {
        if let Some(settings) = self.cache.get::<MeteringSettings>(SETTINGS_KEY) {
            return Ok(settings);
        }

        let row = sqlx::query_as::<_, MeteringSettings>(
            r#"
            SELECT
                central_api_url,
                license_key,
                api_key,
                api_secret,
                warning_threshold,
                hard_limit_threshold,
                sync_interval_hours,
                cache_ttl_seconds,
                use_cache,
                block_on_exceeded,
                send_alert_emails,
                alert_email,
                sync_status,
                last_license_sync,
                last_usage_sync,
                last_sync_error
            FROM metering_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(settings) => {
                self.cache.set(SETTINGS_KEY, &settings, SETTINGS_CACHE_TTL);
                Ok(settings)
            }
            None => Ok(MeteringSettings::default()),
        }
    }

    pub async fn save(&self, settings: &MeteringSettings) -> Result<(), SettingsStoreError> {
        settings.validate()?;

        sqlx::query(
            r#"
            INSERT INTO metering_settings (
                id,
                central_api_url,
                license_key,
                api_key,
                api_secret,
                warning_threshold,
                hard_limit_threshold,
                sync_interval_hours,
                cache_ttl_seconds,
                use_cache,
                block_on_exceeded,
                send_alert_emails,
                alert_email
            ) VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id)
            DO UPDATE SET
                central_api_url = EXCLUDED.central_api_url,
                license_key = EXCLUDED.license_key,
                api_key = EXCLUDED.api_key,
                api_secret = EXCLUDED.api_secret,
                warning_threshold = EXCLUDED.warning_threshold,
                hard_limit_threshold = EXCLUDED.hard_limit_threshold,
                sync_interval_hours = EXCLUDED.sync_interval_hours,
                cache_ttl_seconds = EXCLUDED.cache_ttl_seconds,
                use_cache = EXCLUDED.use_cache,
                block_on_exceeded = EXCLUDED.block_on_exceeded,
                send_alert_emails = EXCLUDED.send_alert_emails,
                alert_email = EXCLUDED.alert_email,
                updated_at = NOW()
            "#,
        )
        .bind(&settings.central_api_url)
        .bind(&settings.license_key)
        .bind(&settings.api_key)
        .bind(&settings.api_secret)
        .bind(settings.warning_threshold)
        .bind(settings.hard_limit_threshold)
        .bind(settings.sync_interval_hours)
        .bind(settings.cache_ttl_seconds)
        .bind(settings.use_cache)
        .bind(settings.block_on_exceeded)
        .bind(settings.send_alert_emails)
        .bind(&settings.alert_email)
        .execute(&self.pool)
        .await?;

        self.invalidate();
        Ok(())
    }

    /// Inserts the default record on first boot.
    pub async fn ensure_defaults(&self) -> Result<(), SettingsStoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM metering_settings WHERE id = 1)")
                .fetch_one(&self.pool)
                .await?;
        if exists {
            return Ok(());
        }

        self.save(&MeteringSettings::default()).await?;
        tracing::info!("created default metering settings; configure API credentials");
        Ok(())
    }

    pub async fn record_license_sync(&self, status: &str, error: &str) {
        let result = sqlx::query(
            r#"
            UPDATE metering_settings
            SET sync_status = $1,
                last_license_sync = NOW(),
                last_sync_error = $2,
                updated_at = NOW()
            WHERE id = 1
            "#,
        )
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self.cache.delete(SETTINGS_KEY),
            Err(err) => warn!(?err, %status, "failed to record license sync status"),
        }
    }

    pub async fn record_usage_sync(&self) {
        let result = sqlx::query(
            "UPDATE metering_settings SET last_usage_sync = NOW(), updated_at = NOW() WHERE id = 1",
        )
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self.cache.delete(SETTINGS_KEY),
            Err(err) => warn!(?err, "failed to record usage sync timestamp"),
        }
    }

    pub fn invalidate(&self) {
        self.cache.delete(SETTINGS_KEY);
        self.cache.delete(LICENSE_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MeteringSettings {
        MeteringSettings {
            central_api_url: "https://billing.example.com/api".to_string(),
            ..MeteringSettings::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(settings().validate(), Ok(()));
    }

    #[test]
    fn warning_must_stay_below_hard_limit() {
        let mut invalid = settings();
        invalid.warning_threshold = 100.0;
        assert_eq!(invalid.validate(), Err(SettingsError::ThresholdOrder));
    }

    #[test]
    fn sync_interval_bounded_to_a_day() {
        let mut invalid = settings();
        invalid.sync_interval_hours = 0;
        assert_eq!(invalid.validate(), Err(SettingsError::SyncInterval));
        invalid.sync_interval_hours = 25;
        assert_eq!(invalid.validate(), Err(SettingsError::SyncInterval));
        invalid.sync_interval_hours = 24;
        assert_eq!(invalid.validate(), Ok(()));
    }

    #[test]
    fn cache_ttl_has_a_floor() {
        let mut invalid = settings();
        invalid.cache_ttl_seconds = 59;
        assert_eq!(invalid.validate(), Err(SettingsError::CacheTtl));
    }

    #[test]
    fn rejects_unparseable_central_url() {
        let mut invalid = settings();
        invalid.central_api_url = "not a url".to_string();
        assert!(matches!(invalid.validate(), Err(SettingsError::CentralUrl(_))));
    }

    #[test]
    fn alert_recipient_requires_flag_and_address() {
        let mut current = settings();
        current.alert_email = Some("ops@example.com".to_string());
        assert_eq!(current.alert_recipient(), None);
        current.send_alert_emails = true;
        assert_eq!(current.alert_recipient(), Some("ops@example.com"));
        current.alert_email = Some("  ".to_string());
        assert_eq!(current.alert_recipient(), None);
    }
}
