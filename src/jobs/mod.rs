pub mod aggregation;
pub mod central_sync;
pub mod limit_checks;
pub mod retention;
pub mod scheduler;
pub mod usage_sync;

pub use aggregation::{aggregate_usage, group_into_buckets, AggregationSummary};
pub use central_sync::{send_heartbeat, sync_license, HeartbeatSummary, RemoteCommand};
pub use limit_checks::{check_all_limits, LimitCheckSummary};
pub use retention::{cleanup_old_records, CleanupSummary};
pub use usage_sync::{sync_usage_to_central, UsageSyncOutcome};
