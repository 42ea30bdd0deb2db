//! `/run` error taxonomy and its JSON envelope
//!
//! Every error response body is `{"error": {"code": ..., "message": ...}}`.

use hyper::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::processor::{FailureCause, ProcessError};

pub const INVALID_REQUEST: &str = "invalid_request";
pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";
pub const INTERNAL_ERROR: &str = "internal_error";

#[derive(Debug, Error)]
pub enum RunError {
    /// Malformed body or address; never reaches the processor
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Processing(#[from] ProcessError),

    #[error("processing exceeded the deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// Failure inside the handler itself; the detail is logged, never returned
    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Processing(e) => match e.cause {
                FailureCause::Client => StatusCode::UNPROCESSABLE_ENTITY,
                FailureCause::Server => StatusCode::BAD_GATEWAY,
            },
            Self::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Validation(_) => INVALID_REQUEST,
            Self::Processing(e) => &e.code,
            Self::DeadlineExceeded(_) => DEADLINE_EXCEEDED,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Message safe to show to the caller
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Processing(e) => e.message.clone(),
            Self::DeadlineExceeded(_) => self.to_string(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.public_message())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RunError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RunError::from(ProcessError::client("address_not_found", "Invalid address")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            RunError::from(ProcessError::server("upstream_error", "boom")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RunError::DeadlineExceeded(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            RunError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = RunError::Internal("db password is hunter2".into());
        let body = serde_json::to_value(err.to_body()).expect("serialize");
        assert_eq!(body["error"]["code"], "internal_error");
        assert_eq!(body["error"]["message"], "internal server error");
    }

    #[test]
    fn test_processing_code_passes_through() {
        let err = RunError::from(ProcessError::client("no_station", "nothing nearby"));
        let body = serde_json::to_value(err.to_body()).expect("serialize");
        assert_eq!(body["error"]["code"], "no_station");
        assert_eq!(body["error"]["message"], "nothing nearby");
    }
}
