use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use httpmock::prelude::*;
use meterd::alerts::{AlertError, AlertKind, AlertNotifier, DisabledNotifier, NotifyError};
use meterd::central::RetryPolicy;
use meterd::jobs;
use meterd::license::{LicenseError, LicenseSnapshot};
use meterd::metering::{insert_usage, start_usage_recorder, LimitStatus, NewUsage, UsageRecord};
use meterd::resources::{LicenseStatus, ResourceKind, Tier};
use meterd::settings::MeteringSettings;
use meterd::AppContext;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

const FAST_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    base_delay: Duration::from_millis(1),
};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

async fn context(pool: &PgPool, notifier: Arc<dyn AlertNotifier>) -> AppContext {
    sqlx::migrate!("./migrations").run(pool).await.unwrap();
    let recorder = start_usage_recorder(pool.clone(), 16);
    AppContext::new(pool.clone(), recorder, notifier).with_retry_policy(FAST_RETRY)
}

async fn configure(ctx: &AppContext, url: &str, update: impl FnOnce(&mut MeteringSettings)) {
    let mut settings = MeteringSettings {
        central_api_url: url.to_string(),
        license_key: Some("LIC-1".to_string()),
        api_key: Some("key-1".to_string()),
        ..MeteringSettings::default()
    };
    update(&mut settings);
    ctx.settings.save(&settings).await.unwrap();
}

async fn install_license(ctx: &AppContext, limit: f64) {
    let mut license = LicenseSnapshot::for_tier("LIC-1", Tier::Builder, LicenseStatus::Active);
    license.resource_limits.set(ResourceKind::ApiCalls, limit);
    ctx.license.save_license(&license).await.unwrap();
}

// key: metering-job-tests -> database-backed batch flows
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn aggregation_stamps_hour_buckets(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    let hour = Utc.with_ymd_and_hms(2026, 10, 18, 13, 0, 0).unwrap();
    for minute in [5, 40] {
        let usage = NewUsage::new(ResourceKind::ApiCalls, 10.0)
            .at(hour + ChronoDuration::minutes(minute));
        insert_usage(&pool, &usage).await.unwrap();
    }
    insert_usage(&pool, &NewUsage::new(ResourceKind::Emails, 1.0).at(hour)).await.unwrap();

    let now = Utc::now();
    let summary = jobs::aggregate_usage(&ctx.pool, now).await.unwrap();
    assert_eq!(summary.aggregated_count, 3);
    assert_eq!(summary.resources.len(), 2);

    let periods: Vec<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> = sqlx::query_as(
        "SELECT period_start, period_end FROM usage_records WHERE resource = 'api_calls'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    for (start, end) in periods {
        assert_eq!(start, hour);
        assert_eq!(end, hour + ChronoDuration::hours(1));
    }

    let again = jobs::aggregate_usage(&ctx.pool, now).await.unwrap();
    assert_eq!(again.aggregated_count, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn usage_sync_marks_records_only_on_success(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    let server = MockServer::start_async().await;
    configure(&ctx, &server.base_url(), |_| {}).await;

    insert_usage(&pool, &NewUsage::new(ResourceKind::ApiCalls, 5.0)).await.unwrap();
    jobs::aggregate_usage(&ctx.pool, Utc::now()).await.unwrap();

    let mut failing = server.mock(|when, then| {
        when.method(POST).path("/method/simbotix.api.metering.report_usage");
        then.status(500).body("boom");
    });
    let outcome = jobs::sync_usage_to_central(&ctx, Utc::now()).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.synced_count, 0);
    failing.assert_hits(2);
    failing.delete();

    let unsynced: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_records WHERE synced = FALSE")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(unsynced, 1);

    server.mock(|when, then| {
        when.method(POST).path("/method/simbotix.api.metering.report_usage");
        then.status(200)
            .json_body(json!({"message": {"success": true, "accepted": 1}}));
    });
    let outcome = jobs::sync_usage_to_central(&ctx, Utc::now()).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.synced_count, 1);

    let settings = ctx.settings.load().await.unwrap();
    assert!(settings.last_usage_sync.is_some());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn usage_sync_requires_license_key(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    let outcome = jobs::sync_usage_to_central(&ctx, Utc::now()).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "No license key configured");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cleanup_removes_only_old_synced_records(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    let now = Utc::now();
    let old = now - ChronoDuration::days(45);

    for (synced, created_at) in [(true, old), (false, old), (true, now)] {
        sqlx::query(
            "INSERT INTO usage_records (id, resource, quantity, synced, created_at) VALUES ($1, 'emails', 1, $2, $3)",
        )
        .bind(Uuid::new_v4())
        .bind(synced)
        .bind(created_at)
        .execute(&pool)
        .await
        .unwrap();
    }

    let summary = jobs::cleanup_old_records(&ctx.pool, now, 30).await.unwrap();
    assert_eq!(summary.deleted_count, 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_records")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn repeated_alerts_fold_into_one_per_day(pool: PgPool) {
    let notifier = Arc::new(RecordingNotifier::default());
    let ctx = context(&pool, notifier.clone()).await;
    configure(&ctx, "https://billing.example.com/api", |settings| {
        settings.send_alert_emails = true;
        settings.alert_email = Some("ops@example.com".to_string());
    })
    .await;

    let first = ctx
        .alerts
        .create_alert(ResourceKind::ApiCalls, AlertKind::Exceeded, 64_000.0, 50_000.0, true)
        .await
        .unwrap();
    assert!(first.notification_sent);
    assert_eq!(first.threshold_percent, 100.0);
    assert_eq!(first.overage_amount, Some(0.7));

    let second = ctx
        .alerts
        .create_alert(ResourceKind::ApiCalls, AlertKind::Exceeded, 70_000.0, 50_000.0, true)
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.current_usage, 70_000.0);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);

    let pending = ctx.alerts.pending().await.unwrap();
    assert_eq!(pending.len(), 1);

    let acked = ctx.alerts.acknowledge(first.id, "ops@example.com").await.unwrap();
    assert!(acked.acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("ops@example.com"));
    assert!(ctx.alerts.pending().await.unwrap().is_empty());

    let reopened = ctx
        .alerts
        .create_alert(ResourceKind::ApiCalls, AlertKind::Exceeded, 72_000.0, 50_000.0, false)
        .await
        .unwrap();
    assert_ne!(reopened.id, first.id);
    assert!(!reopened.acknowledged);
    let pending = ctx.alerts.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, reopened.id);

    let missing = ctx.alerts.acknowledge(Uuid::new_v4(), "ops@example.com").await;
    assert!(matches!(missing, Err(AlertError::NotFound)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn limit_sweep_raises_alerts_over_threshold(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    configure(&ctx, "https://billing.example.com/api", |_| {}).await;
    install_license(&ctx, 100.0).await;
    insert_usage(&pool, &NewUsage::new(ResourceKind::ApiCalls, 85.0)).await.unwrap();

    assert_eq!(
        ctx.metering.check_limits(ResourceKind::ApiCalls).await.unwrap(),
        LimitStatus::Warning
    );

    let summary = jobs::check_all_limits(&ctx).await.unwrap();
    assert_eq!(summary.alerts_created, 1);
    assert_eq!(summary.resources_checked, ResourceKind::ALL.len() as u32);

    let pending = ctx.alerts.pending().await.unwrap();
    assert_eq!(pending[0].alert_type, "Warning");
    assert_eq!(pending[0].threshold_percent, 80.0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn quota_guard_blocks_only_when_configured(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    configure(&ctx, "https://billing.example.com/api", |settings| {
        settings.block_on_exceeded = true;
    })
    .await;
    install_license(&ctx, 10.0).await;
    insert_usage(&pool, &NewUsage::new(ResourceKind::ApiCalls, 10.0)).await.unwrap();

    let blocked = ctx
        .metering
        .guard_quota(ResourceKind::ApiCalls, 1.0, async { Ok::<_, LicenseError>("ran") })
        .await;
    assert!(matches!(blocked, Err(LicenseError::QuotaExceeded { .. })));

    configure(&ctx, "https://billing.example.com/api", |_| {}).await;
    let allowed = ctx
        .metering
        .guard_quota(ResourceKind::ApiCalls, 1.0, async { Ok::<_, LicenseError>("ran") })
        .await
        .unwrap();
    assert_eq!(allowed, "ran");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn license_sync_stores_remote_license(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    let server = MockServer::start_async().await;
    configure(&ctx, &server.base_url(), |_| {}).await;

    server.mock(|when, then| {
        when.method(POST)
            .path("/method/simbotix.api.licensing.get_license_details");
        then.status(200).json_body(json!({
            "message": {
                "success": true,
                "license": {
                    "tier": "Growth",
                    "status": "Active",
                    "resource_limits": {"api_calls": 200000},
                    "enabled_features": ["webhooks"],
                    "enabled_apps": ["flowz"]
                }
            }
        }));
    });

    let outcome = jobs::sync_license(&ctx).await.unwrap();
    assert!(outcome.success, "{}", outcome.message);

    let license = ctx.license.require(Some("webhooks"), Some("flowz")).await.unwrap();
    assert_eq!(license.tier, Tier::Growth);
    assert_eq!(license.limit(ResourceKind::ApiCalls), 200_000.0);
    assert!(ctx.license.is_licensed(None, Some("flowz")).await.unwrap());
    assert!(!ctx.license.is_licensed(Some("ai_agents"), None).await.unwrap());

    assert_eq!(
        ctx.license.get_enabled_features().await.unwrap().into_iter().collect::<Vec<_>>(),
        vec!["webhooks".to_string()]
    );
    assert!(ctx.license.get_enabled_apps().await.unwrap().contains("flowz"));

    let settings = ctx.settings.load().await.unwrap();
    assert_eq!(settings.sync_status.as_deref(), Some("Synced"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn heartbeat_keeps_running_commands_after_a_failure(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    let server = MockServer::start_async().await;
    configure(&ctx, &server.base_url(), |_| {}).await;

    server.mock(|when, then| {
        when.method(POST).path("/method/simbotix.api.heartbeat.ping");
        then.status(200).json_body(json!({
            "message": {"acknowledged": true, "commands": ["sync_usage", "sync_license"]}
        }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/method/simbotix.api.licensing.get_license_details");
        then.status(200).json_body(json!({
            "message": {"success": true, "license": {"tier": "Builder", "status": "Active"}}
        }));
    });

    // Usage sync fails on the missing table; the license command must still run.
    sqlx::query("DROP TABLE usage_records").execute(&pool).await.unwrap();

    let summary = jobs::send_heartbeat(&ctx, Utc::now()).await.unwrap();
    assert!(summary.acknowledged);
    assert_eq!(summary.commands_executed, 1);
    assert_eq!(ctx.license.get_license_tier().await.unwrap(), Some(Tier::Builder));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn trackers_record_storage_and_email_usage(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;

    ctx.recorder.track_file_upload(536_870_912, "report.pdf").await;
    ctx.recorder.track_file_upload(0, "empty.txt").await;
    ctx.recorder.track_email_queued("welcome-42").await;

    let mut records: Vec<UsageRecord> = Vec::new();
    for _ in 0..50 {
        records = sqlx::query_as("SELECT * FROM usage_records ORDER BY resource")
            .fetch_all(&pool)
            .await
            .unwrap();
        if records.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(records.len(), 2);

    let email = &records[0];
    assert_eq!(email.resource, "emails");
    assert_eq!(email.quantity, 1.0);
    assert_eq!(email.reference_type.as_deref(), Some("Email Queue"));
    assert_eq!(email.reference_name.as_deref(), Some("welcome-42"));

    let storage = &records[1];
    assert_eq!(storage.resource, "storage_gb");
    assert_eq!(storage.quantity, 0.5);
    assert_eq!(storage.reference_name.as_deref(), Some("report.pdf"));
    assert!(!storage.aggregated && !storage.synced);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn license_sync_records_failure(pool: PgPool) {
    let ctx = context(&pool, Arc::new(DisabledNotifier)).await;
    let server = MockServer::start_async().await;
    configure(&ctx, &server.base_url(), |_| {}).await;

    server.mock(|when, then| {
        when.method(POST)
            .path("/method/simbotix.api.licensing.get_license_details");
        then.status(403);
    });

    let outcome = jobs::sync_license(&ctx).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Access denied");

    let settings = ctx.settings.load().await.unwrap();
    assert_eq!(settings.sync_status.as_deref(), Some("Failed"));
    assert_eq!(settings.last_sync_error.as_deref(), Some("Access denied"));
}
