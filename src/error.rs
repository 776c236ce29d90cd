//! Error taxonomy for the coordination protocol
//!
//! Every failure the coordinator or a worker can hit is one of the
//! [`SumError`] variants. They are caught at the state-machine boundary and
//! turned into a status string plus a transition to `Failed`/`Error`; none of
//! them abort the process.

use thiserror::Error;

/// Failures reported by a coordination store implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed value at '{path}': {message}")]
    Serialization { path: String, message: String },

    #[error("injected failure on {op} '{path}'")]
    InjectedFailure { op: &'static str, path: String },
}

impl StoreError {
    pub fn serialization(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Serialization {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Protocol-level failures surfaced by the coordinator and workers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SumError {
    /// Caller-supplied numbers did not parse or are out of range.
    #[error("invalid {field}: '{value}'")]
    InvalidInput { field: &'static str, value: String },

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// No job is currently published under the jobs collection.
    #[error("no active job found")]
    NoActiveJob,

    #[error("worker {worker_id} could not report its result: {reason}")]
    ReportFailed { worker_id: String, reason: String },

    /// Programming-contract violation (e.g. zero participants).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SumError {
    pub fn invalid_input(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            value: value.into(),
        }
    }

    pub fn report_failed(worker_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::ReportFailed {
            worker_id: worker_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Human-readable status line shown to the user.
    pub fn status_message(&self) -> String {
        match self {
            SumError::InvalidInput { .. } => format!("Please check the input values: {}", self),
            SumError::StoreUnavailable(e) => format!("Error during calculation: {}", e),
            SumError::NoActiveJob => {
                "Could not find an active calculation, try again later.".to_string()
            }
            SumError::ReportFailed { .. } => {
                "Error sending data to the server, try again later.".to_string()
            }
            SumError::InvalidArgument(msg) => format!("Internal error: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_to_unavailable() {
        let err: SumError = StoreError::Unavailable("connection reset".into()).into();
        assert!(matches!(err, SumError::StoreUnavailable(_)));
        assert_eq!(
            err.status_message(),
            "Error during calculation: store unavailable: connection reset"
        );
    }

    #[test]
    fn test_invalid_input_display() {
        let err = SumError::invalid_input("rows", "abc");
        assert_eq!(err.to_string(), "invalid rows: 'abc'");
    }
}
