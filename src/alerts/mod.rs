pub mod models;
pub mod notifier;
pub mod service;

pub use models::{derive_figures, AlertFigures, AlertKind, UsageAlert};
pub use notifier::{AlertNotifier, DisabledNotifier, NotifyError, SmtpNotifier};
pub use service::{AlertError, AlertService};
