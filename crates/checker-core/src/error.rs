//! Error taxonomy for a single probe invocation.

use thiserror::Error;

use crate::kind::{HEALTH_CHECKER_TYPE, ProbeKind};

/// Result type alias for probe operations.
pub type CheckResult<T> = Result<T, ProbeError>;

/// Everything that can end a probe invocation. None of these are retried.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unsupported probe type '{0}' in environment variable '{HEALTH_CHECKER_TYPE}'")]
    InvalidKind(String),

    #[error("Please specify a supported type [{0}] as environment variable '{HEALTH_CHECKER_TYPE}'")]
    MissingType(String),

    #[error("missing required option --{0}")]
    MissingOption(String),

    #[error("invalid value '{value}' for option --{option}: {reason}")]
    InvalidOption {
        option: String,
        value: String,
        reason: String,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("status code mismatch: expected {expected}, got {actual}")]
    StatusMismatch { expected: u16, actual: u16 },

    #[error("the pattern '{0}' does not match the response")]
    PatternMismatch(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("writing response: {0}")]
    Output(#[from] std::io::Error),
}

impl ProbeError {
    /// The usage error raised when no probe type is configured. Lists every
    /// [`ProbeKind`] in declaration order.
    pub fn missing_type() -> Self {
        let kinds: Vec<&str> = ProbeKind::ALL.iter().map(|k| k.as_str()).collect();
        ProbeError::MissingType(kinds.join(", "))
    }

    pub fn invalid_option(
        option: &str,
        value: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        ProbeError::InvalidOption {
            option: option.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        ProbeError::Connection(err.to_string())
    }
}
