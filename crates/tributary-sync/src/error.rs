//! Error types for the sync jobs
//!
//! Every stage returns [`SyncError`]. Callers decide whether to skip a unit,
//! retry, or abort by looking at [`SyncError::kind`].

use std::time::Duration;
use thiserror::Error;
use tributary_common::CommonError;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Broad class of a failure, used for logging and for skip/abort decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing configuration; raised before a job starts
    Config,
    /// Cursor or change detection failed; nothing has been touched yet
    Detection,
    /// A single unit could not be fetched
    Fetch,
    /// Rate limit or server error that survived every retry
    Transient,
    /// Payload could not be normalised
    Transform,
    /// Staging, warehouse, or delivery failed; the cursor did not move
    Load,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Detection => "detection",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Transient => "transient",
            ErrorKind::Transform => "transform",
            ErrorKind::Load => "load",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration for {name}: {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("No cursor stored for {0}")]
    CursorNotFound(String),

    #[error("Change detection failed: {0}")]
    Detection(String),

    #[error("No new units for {0}")]
    EmptyDelta(String),

    /// Non-success response from a source API, message taken verbatim from the body
    #[error("Status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to fetch {unit}: {reason}")]
    Fetch { unit: String, reason: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Push rejected with status {status}: {message}")]
    PushRejected { status: u16, message: String },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Statement {statement_id} failed: {message}")]
    StatementFailed {
        statement_id: String,
        message: String,
    },

    #[error("Statement {statement_id} was aborted")]
    StatementAborted { statement_id: String },

    #[error("Statement {statement_id} did not finish within {waited:?}")]
    StatementTimeout {
        statement_id: String,
        waited: Duration,
    },

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl SyncError {
    pub fn invalid_config(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn fetch(unit: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            unit: unit.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MissingConfig(_) | SyncError::InvalidConfig { .. } => ErrorKind::Config,
            SyncError::CursorNotFound(_)
            | SyncError::Detection(_)
            | SyncError::EmptyDelta(_) => ErrorKind::Detection,
            SyncError::Api { .. }
            | SyncError::Fetch { .. }
            | SyncError::ObjectNotFound(_)
            | SyncError::Http(_) => ErrorKind::Fetch,
            SyncError::RetriesExhausted { .. } => ErrorKind::Transient,
            SyncError::Transform(_)
            | SyncError::Json(_)
            | SyncError::Csv(_)
            | SyncError::Common(_) => ErrorKind::Transform,
            SyncError::PushRejected { .. }
            | SyncError::StatementFailed { .. }
            | SyncError::StatementAborted { .. }
            | SyncError::StatementTimeout { .. }
            | SyncError::Warehouse(_)
            | SyncError::Storage(_)
            | SyncError::Io(_) => ErrorKind::Load,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_surfaces_message_verbatim() {
        let err = SyncError::Api {
            status: 401,
            message: "Invalid token.".to_string(),
        };
        assert_eq!(err.to_string(), "Status 401: Invalid token.");
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(SyncError::MissingConfig("X".into()).kind(), ErrorKind::Config);
        assert_eq!(SyncError::CursorNotFound("events".into()).kind(), ErrorKind::Detection);
        assert_eq!(
            SyncError::RetriesExhausted {
                attempts: 6,
                last_error: "status 503".into()
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(SyncError::transform("bad row").kind(), ErrorKind::Transform);
        assert_eq!(
            SyncError::StatementAborted {
                statement_id: "abc".into()
            }
            .kind(),
            ErrorKind::Load
        );
    }
}
