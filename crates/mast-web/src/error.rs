//! Error-to-response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use mast_sqlite::{CreateRepositoryError, SqliteError};

#[derive(Debug, Error)]
pub enum WebError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WebError>;

impl From<SqliteError> for WebError {
    fn from(err: SqliteError) -> Self {
        WebError::Storage(err.to_string())
    }
}

impl From<CreateRepositoryError> for WebError {
    fn from(err: CreateRepositoryError) -> Self {
        match err {
            CreateRepositoryError::RepositoryExists
            | CreateRepositoryError::ArtifactNameTaken
            | CreateRepositoryError::UnknownChangeset
            | CreateRepositoryError::Resolve(_) => WebError::BadRequest(err.to_string()),
            CreateRepositoryError::Storage(msg) => WebError::Storage(msg),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            WebError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            WebError::Storage(message) => {
                // The cause goes to the log; the client gets an opaque 500.
                error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            WebError::Io(err) => {
                error!(error = %err, "io error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
