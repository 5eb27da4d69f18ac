// Error types for pool and unit operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reserved code: isolated execution is unavailable and no fallback was given.
pub const CODE_NO_CAPABILITY_NO_FALLBACK: &str = "no-capability-no-fallback";

/// Reserved code: generic failure surfaced from the underlying primitive.
pub const CODE_UNIT_ERROR: &str = "unit-error";

/// Structured error payload delivered through completion and failure paths.
///
/// Capability-absence errors travel through the *completion* path as this
/// payload (reported, never thrown); primitive failures travel through the
/// failure path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    /// Payload for the no-isolation, no-fallback condition.
    pub fn no_capability_no_fallback() -> Self {
        Self {
            code: CODE_NO_CAPABILITY_NO_FALLBACK.to_string(),
            message: "isolated execution is not available in this environment \
                      and no fallback has been given"
                .to_string(),
        }
    }

    /// Payload for a failure surfaced from the underlying primitive.
    pub fn unit_error(message: impl Into<String>) -> Self {
        Self {
            code: CODE_UNIT_ERROR.to_string(),
            message: message.into(),
        }
    }

    /// The payload as a JSON value, for delivery through the completion path.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

impl From<UnitError> for ErrorInfo {
    fn from(err: UnitError) -> Self {
        Self::unit_error(err.to_string())
    }
}

/// Errors surfaced while a unit executes or replies.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("worker stopped before replying")]
    WorkerShutdown,

    #[error("dispatch queue is full")]
    QueueFull,

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("no helper named '{0}' in scope")]
    UnknownHelper(String),
}

/// Errors returned by pool and unit bookkeeping operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("backend failed to build unit: {0}")]
    Spawn(String),

    #[error("unit has been terminated")]
    Terminated,

    #[error("field '{0}' is reserved and cannot be overridden")]
    ReservedField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            UnitError::Execution("boom".to_string()).to_string(),
            "execution failed: boom"
        );
        assert_eq!(
            PoolError::ReservedField("terminate".to_string()).to_string(),
            "field 'terminate' is reserved and cannot be overridden"
        );
        assert_eq!(PoolError::Terminated.to_string(), "unit has been terminated");
    }

    #[test]
    fn no_capability_payload() {
        let info = ErrorInfo::no_capability_no_fallback();
        assert_eq!(info.code, CODE_NO_CAPABILITY_NO_FALLBACK);
        assert!(!info.message.is_empty());

        let value = info.to_value();
        assert_eq!(value["code"], CODE_NO_CAPABILITY_NO_FALLBACK);
    }

    #[test]
    fn unit_error_conversion() {
        let info: ErrorInfo = UnitError::WorkerShutdown.into();
        assert_eq!(info.code, CODE_UNIT_ERROR);
        assert_eq!(info.message, "worker stopped before replying");
    }
}
