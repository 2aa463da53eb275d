use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    // MultipartError is not Send, so keep the message only. AppError must
    // stay Send + Sync for anyhow and spawned tasks.
    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Blocking task error: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Missing authorization token")]
    TokenMissing,

    #[error("Invalid authorization token")]
    TokenInvalid,

    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload exceeds the size limit")]
    PayloadTooLarge,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(e: actix_multipart::MultipartError) -> Self {
        AppError::Multipart(e.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({
                "error": self.to_string(),
            }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Migrate(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Multipart(_) => StatusCode::BAD_REQUEST,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::EmailTaken => StatusCode::CONFLICT,
            AppError::TokenMissing => StatusCode::UNAUTHORIZED,
            AppError::TokenInvalid => StatusCode::UNAUTHORIZED,
            AppError::InvalidFileType(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
