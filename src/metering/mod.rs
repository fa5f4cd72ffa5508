pub mod limits;
pub mod models;
pub mod overage;
pub mod recorder;
pub mod service;

pub use limits::{evaluate_limit, usage_percentage};
pub use models::{LimitStatus, NewUsage, ResourceUsage, Thresholds, UsageRecord};
pub use overage::{overage_cost, overage_rate, OverageEstimate, OverageRate};
pub use recorder::{insert_usage, start_usage_recorder, UsageRecorder};
pub use service::{month_start, MeteringService, OverageReport, UsageSummary};
