pub mod alerts;
pub mod api;
pub mod cache;
pub mod central;
pub mod config;
pub mod context;
pub mod error;
pub mod extractor;
pub mod jobs;
pub mod license;
pub mod metering;
pub mod resources;
pub mod routes;
pub mod settings;

pub use context::AppContext;
