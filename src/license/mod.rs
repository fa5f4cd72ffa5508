pub mod models;
pub mod service;

pub use models::{LicenseSnapshot, LicenseSyncOutcome};
pub use service::{check_entitlement, LicenseError, LicenseService};
