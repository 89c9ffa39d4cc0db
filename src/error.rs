use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::models::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Upstream error ({status}): {message}")]
    UpstreamError { status: u16, message: String },
    #[error("Image generation timed out")]
    Timeout,
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Message returned to the client. Details stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::UpstreamError { message, .. } => message.clone(),
            AppError::Timeout => "Image generation timed out".to_string(),
            AppError::BackendUnavailable(_) => {
                "Image generation backend is unavailable".to_string()
            }
            AppError::StorageError(_) => "Failed to store image".to_string(),
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamError { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::BackendUnavailable(_)
            | AppError::StorageError(_)
            | AppError::InternalError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed with {}: {}", status.as_u16(), self);
        } else {
            log::warn!("Request rejected with {}: {}", status.as_u16(), self);
        }
        HttpResponse::build(status).json(ErrorBody::new(self.client_message()))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
