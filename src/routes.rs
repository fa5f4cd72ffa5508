use axum::{
    routing::{get, post},
    Extension, Router,
};

use crate::api;
use crate::context::AppContext;

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/license", get(api::get_license_info))
        .route("/api/license/sync", post(api::sync_now))
        .route("/api/license/features/:feature", get(api::check_feature))
        .route("/api/license/apps/:app", get(api::check_app))
        .route("/api/license/entitlements", get(api::get_entitlements))
        .route(
            "/api/usage",
            get(api::get_usage_summary).post(api::record_usage),
        )
        .route("/api/usage/overage", get(api::get_overage_estimate))
        .route("/api/usage/files", post(api::record_file_upload))
        .route("/api/usage/emails", post(api::record_email_queued))
        .route("/api/alerts", get(api::get_pending_alerts))
        .route("/api/alerts/:id/acknowledge", post(api::acknowledge_alert))
        .route(
            "/api/settings",
            get(api::get_settings).put(api::update_settings),
        )
}

pub async fn root() -> &'static str {
    "meterd metering API"
}

/// Root and API routes with the shared context attached.
pub fn app(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(ctx))
}
