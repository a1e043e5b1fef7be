//! Error types for adaptive-sampler

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Config Errors ===
    #[error(
        "no sampling store backend configured; configure a backend that supports adaptive sampling"
    )]
    NoBackend,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Request Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Lifecycle Errors ===
    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),

    // === Coordination Errors ===
    #[error("Lock backend unreachable: {0}")]
    LockUnavailable(String),

    // === Storage Errors ===
    #[error("Sampling store error: {0}")]
    Store(String),

    #[error("Backend error: {0}")]
    Backend(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Is this a transient coordination error the lease loop should ride out?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LockUnavailable(_) | Error::Store(_) | Error::Timeout(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidConfig(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Store(_) | Error::LockUnavailable(_) | Error::NoBackend => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.to_http_status();
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
