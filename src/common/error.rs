//! Error types for shardfs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    // === Placement Errors ===
    #[error("No active renters available")]
    NoRentersAvailable,

    #[error("Shard {index} of {internal_id} is unavailable")]
    ShardUnavailable { internal_id: String, index: u32 },

    // === Storage Errors ===
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Renter responded {status}: {message}")]
    Renter { status: u16, message: String },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Metadata Errors ===
    #[error("Metadata store error: {0}")]
    Metadata(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // === Input Errors ===
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a transient failure worth one more attempt?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Http(_) | Error::Io(_) | Error::ChecksumMismatch { .. } => {
                true
            }
            // 507: the renter is full, asking again will not help
            Error::Renter { status, .. } => *status >= 500 && *status != 507,
            _ => false,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::NoRentersAvailable | Error::ShardUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Renter { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::CapacityExceeded { .. } => StatusCode::INSUFFICIENT_STORAGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable tag used in JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::NotFound(_) => "not_found",
            Error::NoRentersAvailable => "no_renters_available",
            Error::ShardUnavailable { .. } => "shard_unavailable",
            Error::Corrupted(_) => "corrupted",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::Http(_) => "http",
            Error::Renter { .. } => "renter",
            Error::Timeout(_) => "timeout",
            Error::Metadata(_) => "metadata",
            Error::Serialization(_) => "serialization",
            Error::Validation(_) => "validation",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.to_http_status();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout("fetch".into()).is_retryable());
        assert!(Error::Http("connection reset".into()).is_retryable());
        assert!(Error::Renter {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!Error::Renter {
            status: 404,
            message: "missing".into()
        }
        .is_retryable());
        assert!(!Error::NoRentersAvailable.is_retryable());
        assert!(!Error::Validation("empty filename".into()).is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::NotFound("a.txt".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NoRentersAvailable.to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::ShardUnavailable {
                internal_id: "x".into(),
                index: 2
            }
            .to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Validation("bad".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Timeout("t".into()).to_http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
