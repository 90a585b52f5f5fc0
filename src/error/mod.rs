use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Gate error types
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Counter store error: {0}")]
    CounterStore(String),

    #[error("Counter store is closed")]
    StoreClosed,

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for GateError {
    fn from(err: redis::RedisError) -> Self {
        GateError::CounterStore(err.to_string())
    }
}

impl GateError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::CounterStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::StoreClosed => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Proxy(_) => StatusCode::BAD_GATEWAY,
            GateError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GateError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GateError::Upstream("refused".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GateError::Timeout("slow".to_string()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GateError::StoreClosed.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_display() {
        let err = GateError::Config("rate must be > 0".to_string());
        assert_eq!(err.to_string(), "Configuration error: rate must be > 0");
    }

    #[test]
    fn test_redis_error_conversion() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        let err: GateError = redis_err.into();
        assert!(matches!(err, GateError::CounterStore(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
