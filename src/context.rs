use std::sync::Arc;

use sqlx::PgPool;

use crate::alerts::{AlertNotifier, AlertService};
use crate::cache::TtlCache;
use crate::central::{CentralClient, CentralError, RetryPolicy};
use crate::license::LicenseService;
use crate::metering::{MeteringService, UsageRecorder};
use crate::settings::{MeteringSettings, SettingsStore};

/// key: app-context -> shared services handed to handlers and jobs
#[derive(Clone)]
pub struct AppContext {
    pub pool: PgPool,
    pub cache: Arc<TtlCache>,
    pub settings: SettingsStore,
    pub license: LicenseService,
    pub metering: MeteringService,
    pub alerts: AlertService,
    pub recorder: UsageRecorder,
    retry: RetryPolicy,
}

impl AppContext {
    pub fn new(pool: PgPool, recorder: UsageRecorder, notifier: Arc<dyn AlertNotifier>) -> Self {
        let cache = Arc::new(TtlCache::new());
        let settings = SettingsStore::new(pool.clone(), cache.clone());
        let license = LicenseService::new(pool.clone(), cache.clone(), settings.clone());
        let metering = MeteringService::new(
            pool.clone(),
            license.clone(),
            settings.clone(),
            recorder.clone(),
        );
        let alerts = AlertService::new(pool.clone(), settings.clone(), notifier);

        Self {
            pool,
            cache,
            settings,
            license,
            metering,
            alerts,
            recorder,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Client for the central service configured from `settings`.
    pub fn central_client(&self, settings: &MeteringSettings) -> Result<CentralClient, CentralError> {
        Ok(CentralClient::from_settings(settings)?.with_retry_policy(self.retry))
    }
}
