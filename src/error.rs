use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Error, Debug)]
pub enum AppError {
    /// No month in the lookback window had any rows. Expected state of a
    /// sparse dataset, surfaced as 404 rather than a server error.
    #[error("No recent data found")]
    NoRecentData,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NoRecentData => (StatusCode::NOT_FOUND, "No recent data found".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Extract(ExtractError::Remote { status, message }) => {
                // The extractor already produced a client-facing error;
                // forward its status where it is a valid HTTP code.
                tracing::error!("Extractor error ({}): {}", status, message);
                (
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                    message,
                )
            }
            AppError::Extract(ExtractError::Http(e)) => {
                tracing::error!("Extractor request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process file".to_string(),
                )
            }
            AppError::Extract(ExtractError::Invalid(msg)) => {
                tracing::error!("Invalid extractor response: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Invalid response from extractor".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Server error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
