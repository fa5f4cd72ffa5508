pub mod client;
pub mod models;
pub mod signing;

pub use client::{CentralClient, CentralError, RetryPolicy};
pub use models::{
    HeartbeatResponse, LicenseValidation, RemoteLicense, ReportUsageResponse, SiteInfo, UsageRow,
};
pub use signing::{canonical_json, generate_signature};
