use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use meterd::alerts::{AlertNotifier, DisabledNotifier, SmtpNotifier};
use meterd::jobs::scheduler;
use meterd::metering::start_usage_recorder;
use meterd::{config, routes, AppContext};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

fn alert_notifier() -> Arc<dyn AlertNotifier> {
    match config::SMTP_CONFIG.as_ref() {
        Some(smtp) => match SmtpNotifier::new(smtp) {
            Ok(notifier) => Arc::new(notifier),
            Err(error) => {
                tracing::warn!(%error, "failed to configure SMTP; alert emails disabled");
                Arc::new(DisabledNotifier)
            }
        },
        None => Arc::new(DisabledNotifier),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let recorder = start_usage_recorder(pool.clone(), *config::RECORDER_QUEUE_DEPTH);
    let ctx = AppContext::new(pool.clone(), recorder, alert_notifier());
    if let Err(error) = ctx.settings.ensure_defaults().await {
        tracing::warn!(%error, "failed to create default metering settings");
    }
    scheduler::spawn(ctx.clone());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = routes::app(ctx)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
