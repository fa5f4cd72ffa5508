use sqlx::PgPool;
use tokio::sync::mpsc::{channel, error::TrySendError, Sender};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::models::NewUsage;
use crate::resources::ResourceKind;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// key: usage-recorder -> fire-and-forget usage inserts off the request path
#[derive(Clone)]
pub struct UsageRecorder {
    sender: Sender<NewUsage>,
    pool: PgPool,
}

pub fn start_usage_recorder(pool: PgPool, queue_depth: usize) -> UsageRecorder {
    let (tx, mut rx) = channel::<NewUsage>(queue_depth.max(1));
    let worker_pool = pool.clone();
    tokio::spawn(async move {
        while let Some(usage) = rx.recv().await {
            if let Err(err) = insert_usage(&worker_pool, &usage).await {
                error!(
                    ?err,
                    resource = %usage.resource,
                    quantity = usage.quantity,
                    "failed to create usage record"
                );
            }
        }
    });

    UsageRecorder { sender: tx, pool }
}

impl UsageRecorder {
    /// Queues `usage` for insertion. Falls back to a direct insert when the
    /// queue cannot take it.
    pub async fn record(&self, usage: NewUsage) {
        if !usage.is_meterable() {
            return;
        }

        let usage = match self.sender.try_send(usage) {
            Ok(()) => return,
            Err(TrySendError::Full(usage)) => {
                warn!(resource = %usage.resource, "usage queue full; writing synchronously");
                usage
            }
            Err(TrySendError::Closed(usage)) => {
                warn!(resource = %usage.resource, "usage worker stopped; writing synchronously");
                usage
            }
        };

        if let Err(err) = insert_usage(&self.pool, &usage).await {
            error!(?err, resource = %usage.resource, "failed to create usage record");
        }
    }

    pub async fn track_file_upload(&self, size_bytes: i64, file_name: &str) {
        if size_bytes <= 0 {
            return;
        }
        let usage = NewUsage::new(ResourceKind::StorageGb, size_bytes as f64 / BYTES_PER_GB)
            .app("files")
            .reference("File", file_name);
        self.record(usage).await;
    }

    pub async fn track_email_queued(&self, email_name: &str) {
        let usage = NewUsage::new(ResourceKind::Emails, 1.0)
            .app("mail")
            .reference("Email Queue", email_name);
        self.record(usage).await;
    }
}

pub async fn insert_usage(pool: &PgPool, usage: &NewUsage) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO usage_records (
            id,
            resource,
            quantity,
            recorded_at,
            app_name,
            reference_type,
            reference_name
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(usage.resource.as_str())
    .bind(usage.quantity)
    .bind(usage.recorded_at)
    .bind(&usage.app_name)
    .bind(&usage.reference_type)
    .bind(&usage.reference_name)
    .execute(pool)
    .await?;

    debug!(%id, resource = %usage.resource, quantity = usage.quantity, "usage recorded");
    Ok(id)
}
