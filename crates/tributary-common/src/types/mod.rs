//! Cursor positions shared by the sync jobs
//!
//! A cursor marks the last position a job loaded successfully. Cursors only
//! move forward; the ordering implemented here is the one the stores use to
//! refuse regressions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{CommonError, Result};

// ============================================================================
// Run cursors
// ============================================================================

/// Last run loaded for a run-based source.
///
/// # Examples
///
/// ```rust,ignore
/// use tributary_common::types::RunCursor;
///
/// let cursor = RunCursor {
///     run_id: 1_234_567,
///     created_at: chrono::Utc::now(),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCursor {
    /// Identifier assigned by the source system
    pub run_id: i64,
    /// Creation time reported by the source system
    pub created_at: DateTime<Utc>,
}

impl PartialOrd for RunCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RunCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.run_id.cmp(&other.run_id))
    }
}

impl std::fmt::Display for RunCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {} ({})", self.run_id, self.created_at.to_rfc3339())
    }
}

// ============================================================================
// Object cursors
// ============================================================================

/// Last object loaded from a bucket listing.
///
/// Object keys in an event feed embed their delivery time, so key order is
/// delivery order. Comparison is by key first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCursor {
    pub object_key: String,
    pub last_modified: DateTime<Utc>,
}

impl ObjectCursor {
    pub fn new(object_key: impl Into<String>, last_modified: DateTime<Utc>) -> Result<Self> {
        let object_key = object_key.into();
        if object_key.trim().is_empty() {
            return Err(CommonError::InvalidCursor(
                "object key cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            object_key,
            last_modified,
        })
    }

    /// True when `key` sorts strictly after this cursor.
    pub fn precedes(&self, key: &str) -> bool {
        key > self.object_key.as_str()
    }
}

impl PartialOrd for ObjectCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.object_key
            .cmp(&other.object_key)
            .then(self.last_modified.cmp(&other.last_modified))
    }
}

impl std::fmt::Display for ObjectCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.object_key, self.last_modified.to_rfc3339())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_run_cursor_orders_by_creation_then_id() {
        let older = RunCursor { run_id: 9, created_at: ts(100) };
        let newer = RunCursor { run_id: 1, created_at: ts(200) };
        let tie = RunCursor { run_id: 10, created_at: ts(100) };
        assert!(older < newer);
        assert!(older < tie);
    }

    #[test]
    fn test_object_cursor_precedes_is_strict() {
        let cursor = ObjectCursor::new("feed/2024/01/01/0005.gz", ts(0)).unwrap();
        assert!(cursor.precedes("feed/2024/01/01/0006.gz"));
        assert!(!cursor.precedes("feed/2024/01/01/0005.gz"));
        assert!(!cursor.precedes("feed/2024/01/01/0004.gz"));
    }

    #[test]
    fn test_object_cursor_rejects_empty_key() {
        assert!(ObjectCursor::new("  ", ts(0)).is_err());
    }

    #[test]
    fn test_run_cursor_json_shape() {
        let cursor = RunCursor { run_id: 42, created_at: ts(0) };
        let json = serde_json::to_value(&cursor).unwrap();
        assert_eq!(json["run_id"], 42);
        assert_eq!(json["created_at"], "1970-01-01T00:00:00Z");
    }
}
