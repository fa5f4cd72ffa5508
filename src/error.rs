use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::alerts::AlertError;
use crate::central::CentralError;
use crate::license::LicenseError;
use crate::settings::{SettingsError, SettingsStoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("central API error: {0}")]
    Central(#[from] CentralError),
    #[error(transparent)]
    License(#[from] LicenseError),
    #[error("{0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<SettingsStoreError> for AppError {
    fn from(err: SettingsStoreError) -> Self {
        match err {
            SettingsStoreError::Invalid(err) => err.into(),
            SettingsStoreError::Database(err) => AppError::Db(err),
        }
    }
}

impl From<AlertError> for AppError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::NotFound => AppError::NotFound("Alert not found".to_string()),
            AlertError::Database(err) => AppError::Db(err),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Message(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Central(_) => StatusCode::BAD_GATEWAY,
            AppError::License(LicenseError::QuotaExceeded { .. }) => StatusCode::TOO_MANY_REQUESTS,
            AppError::License(LicenseError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::License(_) => StatusCode::FORBIDDEN,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self);
        }
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
