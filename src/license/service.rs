use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info};

use super::models::{LicenseRow, LicenseSnapshot, LicenseSyncOutcome};
use crate::cache::{TtlCache, LICENSE_KEY};
use crate::central::CentralClient;
use crate::resources::{ResourceKind, Tier};
use crate::settings::SettingsStore;

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("No valid license found. Please configure a license in the metering settings.")]
    NotConfigured,
    #[error("License is not active. Current status: {status}")]
    Inactive { status: String },
    #[error("Feature '{feature}' is not included in your {tier} plan. Please upgrade to access this feature.")]
    FeatureNotEntitled { feature: String, tier: String },
    #[error("App '{app}' is not included in your {tier} plan. Please upgrade to access this app.")]
    AppNotEntitled { app: String, tier: String },
    #[error("Quota exceeded for {resource}. Please upgrade your plan or contact support.")]
    QuotaExceeded { resource: ResourceKind },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// key: license-gate -> entitlement check against an optional snapshot
pub fn check_entitlement(
    license: Option<&LicenseSnapshot>,
    today: NaiveDate,
    feature: Option<&str>,
    app: Option<&str>,
) -> Result<(), LicenseError> {
    let license = license.ok_or(LicenseError::NotConfigured)?;

    if !license.is_valid_on(today) {
        return Err(LicenseError::Inactive {
            status: license.status.to_string(),
        });
    }

    if let Some(feature) = feature {
        if !license.has_feature(feature) {
            return Err(LicenseError::FeatureNotEntitled {
                feature: feature.to_string(),
                tier: license.tier.to_string(),
            });
        }
    }

    if let Some(app) = app {
        if !license.has_app(app) {
            return Err(LicenseError::AppNotEntitled {
                app: app.to_string(),
                tier: license.tier.to_string(),
            });
        }
    }

    Ok(())
}

/// key: license-service -> cached license access and central sync
#[derive(Clone)]
pub struct LicenseService {
    pool: PgPool,
    cache: Arc<TtlCache>,
    settings: SettingsStore,
}

impl LicenseService {
    pub fn new(pool: PgPool, cache: Arc<TtlCache>, settings: SettingsStore) -> Self {
        Self {
            pool,
            cache,
            settings,
        }
    }

    pub async fn get_license(&self) -> Result<Option<LicenseSnapshot>, sqlx::Error> {
        let settings = self.settings.load().await?;
        if settings.use_cache {
            if let Some(cached) = self.cache.get::<LicenseSnapshot>(LICENSE_KEY) {
                return Ok(Some(cached));
            }
        }

        let Some(license) = self.active_license().await? else {
            return Ok(None);
        };

        if settings.use_cache {
            self.cache.set(LICENSE_KEY, &license, settings.cache_ttl());
        }
        Ok(Some(license))
    }

    async fn active_license(&self) -> Result<Option<LicenseSnapshot>, sqlx::Error> {
        let row = sqlx::query_as::<_, LicenseRow>(
            r#"
            SELECT
                license_key,
                customer_id,
                customer_name,
                tier,
                status,
                expiry_date,
                resource_limits,
                enabled_features,
                enabled_apps,
                last_synced,
                sync_status,
                sync_error
            FROM licenses
            WHERE status IN ('Active', 'Trial')
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LicenseSnapshot::from))
    }

    pub async fn get_license_tier(&self) -> Result<Option<Tier>, sqlx::Error> {
        Ok(self.get_license().await?.map(|license| license.tier))
    }

    /// `0` (unlimited) when no license is configured.
    pub async fn get_resource_limit(&self, resource: ResourceKind) -> Result<f64, sqlx::Error> {
        Ok(self
            .get_license()
            .await?
            .map(|license| license.limit(resource))
            .unwrap_or(0.0))
    }

    pub async fn get_enabled_features(&self) -> Result<BTreeSet<String>, sqlx::Error> {
        Ok(self
            .get_license()
            .await?
            .map(|license| license.enabled_features)
            .unwrap_or_default())
    }

    pub async fn get_enabled_apps(&self) -> Result<BTreeSet<String>, sqlx::Error> {
        Ok(self
            .get_license()
            .await?
            .map(|license| license.enabled_apps)
            .unwrap_or_default())
    }

    pub async fn is_licensed(
        &self,
        feature: Option<&str>,
        app: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let license = self.get_license().await?;
        Ok(check_entitlement(license.as_ref(), Utc::now().date_naive(), feature, app).is_ok())
    }

    /// Gatekeeper for licensed actions.
    pub async fn require(
        &self,
        feature: Option<&str>,
        app: Option<&str>,
    ) -> Result<LicenseSnapshot, LicenseError> {
        let license = self.get_license().await?;
        check_entitlement(license.as_ref(), Utc::now().date_naive(), feature, app)?;
        license.ok_or(LicenseError::NotConfigured)
    }

    pub async fn save_license(&self, license: &LicenseSnapshot) -> Result<(), sqlx::Error> {
        let limits = license.resource_limits.clone().normalized();
        let features = license.enabled_features.iter().cloned().collect::<Vec<_>>();
        let apps = license.enabled_apps.iter().cloned().collect::<Vec<_>>();

        sqlx::query(
            r#"
            INSERT INTO licenses (
                license_key,
                customer_id,
                customer_name,
                tier,
                status,
                expiry_date,
                resource_limits,
                enabled_features,
                enabled_apps,
                last_synced,
                sync_status,
                sync_error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (license_key)
            DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                customer_name = EXCLUDED.customer_name,
                tier = EXCLUDED.tier,
                status = EXCLUDED.status,
                expiry_date = EXCLUDED.expiry_date,
                resource_limits = EXCLUDED.resource_limits,
                enabled_features = EXCLUDED.enabled_features,
                enabled_apps = EXCLUDED.enabled_apps,
                last_synced = EXCLUDED.last_synced,
                sync_status = EXCLUDED.sync_status,
                sync_error = EXCLUDED.sync_error,
                updated_at = NOW()
            "#,
        )
        .bind(&license.license_key)
        .bind(&license.customer_id)
        .bind(&license.customer_name)
        .bind(license.tier.as_str())
        .bind(license.status.as_str())
        .bind(license.expiry_date)
        .bind(limits.to_json())
        .bind(&features)
        .bind(&apps)
        .bind(license.last_synced)
        .bind(&license.sync_status)
        .bind(&license.sync_error)
        .execute(&self.pool)
        .await?;

        self.cache.delete(LICENSE_KEY);
        Ok(())
    }

    /// Refreshes the local license from the central service.
    pub async fn sync_license(&self, client: &CentralClient) -> LicenseSyncOutcome {
        let settings = match self.settings.load().await {
            Ok(settings) => settings,
            Err(err) => {
                error!(?err, "failed to load settings for license sync");
                return LicenseSyncOutcome::failed(err.to_string());
            }
        };

        let Some(license_key) = settings.license_key() else {
            return LicenseSyncOutcome::failed("No license key configured");
        };

        match client.get_license_details(license_key).await {
            Ok(Some(remote)) => {
                let snapshot = LicenseSnapshot::from_remote(license_key, remote, Utc::now());
                if let Err(err) = self.save_license(&snapshot).await {
                    error!(?err, "failed to store synced license");
                    self.settings
                        .record_license_sync("Failed", &err.to_string())
                        .await;
                    return LicenseSyncOutcome::failed(err.to_string());
                }

                self.settings.record_license_sync("Synced", "").await;
                info!(tier = %snapshot.tier, status = %snapshot.status, "license synced");
                LicenseSyncOutcome {
                    success: true,
                    message: "License synced successfully".to_string(),
                    license: Some(snapshot),
                }
            }
            Ok(None) => {
                let message = "No response from central API";
                self.settings.record_license_sync("Failed", message).await;
                LicenseSyncOutcome::failed(message)
            }
            Err(err) => {
                error!(error = %err, "license sync failed");
                self.settings
                    .record_license_sync("Failed", &err.to_string())
                    .await;
                LicenseSyncOutcome::failed(err.to_string())
            }
        }
    }
}
