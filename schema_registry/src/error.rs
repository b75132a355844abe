use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("schema body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("schema does not compile: {0}")]
    DoesNotCompile(String),

    #[error("schema {0} not found")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] redis::RedisError),

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::InvalidJson(_) | RegistryError::DoesNotCompile(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Repository(_) | RegistryError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
