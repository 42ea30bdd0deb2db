//! Address processor capability
//!
//! The `/run` handler knows processors only through [`AddressProcessor`]. A
//! processor is injected at construction time and must be safe to call from
//! many requests at once.

mod validator;

pub use validator::{AddressValidator, MaxLength};

use async_trait::async_trait;
use std::borrow::Cow;
use thiserror::Error;

/// Success payload of a processor, serialized verbatim as the response body
pub type ProcessOutcome = serde_json::Value;

/// Which side caused a processing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The address was understood but cannot be processed (unknown place, rejected operation)
    Client,
    /// The processor or one of its upstreams failed
    Server,
}

/// Failure reported by a processor, with its own classification and stable code
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ProcessError {
    pub cause: FailureCause,
    pub code: Cow<'static, str>,
    pub message: String,
}

impl ProcessError {
    pub fn client(code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            cause: FailureCause::Client,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn server(code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            cause: FailureCause::Server,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Performs the "run" operation against a validated address
#[async_trait]
pub trait AddressProcessor: Send + Sync {
    async fn process(&self, address: &str) -> Result<ProcessOutcome, ProcessError>;
}
