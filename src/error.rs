//! Error types for MOM client operations
//!
//! Dispatch-path failures (decode, missing field, handler invocation) are
//! always contained to the single message/handler pair that caused them;
//! nothing in this module is fatal to the process.

use thiserror::Error;

/// Error type returned by application handler callbacks.
///
/// Handlers may fail with any error type; the dispatch engine logs it with
/// the topic and handler identity and moves on to the next handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for MOM client operations
#[derive(Debug, Error)]
pub enum MomError {
    #[error("Payload decode failed ({len} bytes): {reason}")]
    DecodeFailed { len: usize, reason: String },

    #[error("Missing field '{field}' in JSON payload")]
    MissingField { field: String },

    #[error("Invalid parameter binding: {reason}")]
    InvalidBinding { reason: String },

    #[error("Handler '{handler}' invocation failed: {reason}")]
    HandlerInvocationFailed { handler: String, reason: String },

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl MomError {
    /// Create payload decode error
    pub fn decode_failed<S: Into<String>>(len: usize, reason: S) -> Self {
        Self::DecodeFailed {
            len,
            reason: reason.into(),
        }
    }

    /// Create missing field error
    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create invalid binding error
    pub fn invalid_binding<S: Into<String>>(reason: S) -> Self {
        Self::InvalidBinding {
            reason: reason.into(),
        }
    }

    /// Create handler invocation error
    pub fn handler_failed<S: Into<String>, R: Into<String>>(handler: S, reason: R) -> Self {
        Self::HandlerInvocationFailed {
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that are contained to one message/handler pair
    /// during dispatch rather than surfaced to the caller.
    pub fn is_dispatch_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DecodeFailed { .. }
                | Self::MissingField { .. }
                | Self::HandlerInvocationFailed { .. }
        )
    }
}

/// Result type for MOM client operations
pub type MomResult<T> = Result<T, MomError>;
