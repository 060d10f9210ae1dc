use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body returned with every failed API call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: i32,
    pub msg: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    // Request errors
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    // Task store errors
    #[error("task store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("malformed task record: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("dispatch queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Numeric code carried in the error body. Every failure is negative.
    pub fn code(&self) -> i32 {
        match self {
            Self::BodyRead(_) => -1,
            Self::InvalidBody(_) => -2,
            Self::Validation(_) | Self::StoreUnavailable(_) => -3,
            Self::Sqlx(_) | Self::Migration(_) | Self::Json(_) | Self::Io(_) | Self::Join(_) => -4,
            Self::NotFound(_) => -5,
            Self::QueueClosed => -6,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BodyRead(_) | Self::InvalidBody(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) | Self::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("Generating response for AppError: {:?}", self);

        let body = ErrorResponse {
            code: self.code(),
            msg: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
