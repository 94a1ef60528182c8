//! Probe Engine Error Types
//!
//! Every way a verification request can fail before it produces an outcome.
//! A probe that ran and reported failure is not an error; it is a `fail`
//! outcome.

use crate::tools::{CommandValidationError, TimeoutError};
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Error types for probe operations
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The credential document carries no usable token
    #[error("auth_json does not contain a usable access token")]
    InvalidCredential,

    /// Caller-selected probe tokens failed validation
    #[error(transparent)]
    InvalidProbe(#[from] CommandValidationError),

    /// The timeout override cannot be used
    #[error(transparent)]
    InvalidTimeout(#[from] TimeoutError),

    /// The sandbox or credential file could not be written
    #[error("failed to write {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The verifier binary failed its liveness check
    #[error("verifier not runnable: {0}")]
    ToolUnavailable(String),

    /// The probe exceeded its wall-clock budget
    #[error("probe timeout after {0:?}")]
    ProbeTimeout(Duration),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProbeError {
    /// Transport-level status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ProbeError::InvalidCredential
            | ProbeError::InvalidProbe(_)
            | ProbeError::InvalidTimeout(_) => 400,
            ProbeError::WriteError { .. }
            | ProbeError::ToolUnavailable(_)
            | ProbeError::Internal(_) => 500,
            ProbeError::ProbeTimeout(_) => 504,
        }
    }

    /// Stable short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::InvalidCredential => "invalid_credential",
            ProbeError::InvalidProbe(_) => "invalid_probe",
            ProbeError::InvalidTimeout(_) => "invalid_timeout",
            ProbeError::WriteError { .. } => "write_error",
            ProbeError::ToolUnavailable(_) => "tool_unavailable",
            ProbeError::ProbeTimeout(_) => "probe_timeout",
            ProbeError::Internal(_) => "internal",
        }
    }

    /// Message returned to the caller
    ///
    /// Timeouts use the fixed text `probe timeout`; the rest use `Display`.
    pub fn detail(&self) -> String {
        match self {
            ProbeError::ProbeTimeout(_) => "probe timeout".to_string(),
            other => other.to_string(),
        }
    }
}
