use axum::http::StatusCode;
use thiserror::Error;

/// Everything a gateway request can fail with
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid input: {}", .0.join(", "))]
    Validation(Vec<&'static str>),

    #[error("Too many clicks, slow down")]
    RateLimited,

    #[error("Token is busy, retry")]
    LockContention,

    #[error("Token has no clicks")]
    NotFound,

    #[error("Counter store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),
}

impl GatewayError {
    /// HTTP status for this error.
    ///
    /// `NotFound` is answered with 200 and `success: false`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::LockContention => StatusCode::CONFLICT,
            GatewayError::NotFound => StatusCode::OK,
            GatewayError::Store(_) | GatewayError::SignerUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to clients
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Validation(_) => "Invalid input".to_string(),
            GatewayError::Store(_) => "Counter store unavailable".to_string(),
            GatewayError::SignerUnavailable(_) => "Signer unavailable".to_string(),
            other => other.to_string(),
        }
    }
}
