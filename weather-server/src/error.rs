use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use weather_core::ResolveError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("City parameter is required")]
    MissingCity,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Failed to fetch weather data")]
    Unavailable(#[source] ResolveError),

    #[error("Not found")]
    NotFound,

    #[error("Request timed out")]
    Timeout,

    #[error("Internal server error")]
    Internal(String),
}

/// Error envelope returned for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub message: String,
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::MissingCity => StatusCode::BAD_REQUEST,
            ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ResolveError> for ServerError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::EmptyCity => ServerError::MissingCity,
            ResolveError::RateLimited => ServerError::RateLimited,
            other => ServerError::Unavailable(other),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            ServerError::Unavailable(cause) => {
                tracing::warn!(error = %cause, "weather resolution failed");
            }
            ServerError::Internal(cause) => tracing::error!(error = %cause, "middleware failed"),
            _ => {}
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            code: status.as_u16(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
