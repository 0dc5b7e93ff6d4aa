//! Durable cursors
//!
//! A cursor records the last position a job committed. Reading it tells the
//! change detector where to start; advancing it is the final step of a
//! successful run and never happens before the matching load commits.
//!
//! - [`json::JsonCursorStore`]: a small JSON object in the staging bucket
//! - [`snapshot::SnapshotStore`]: the reference fingerprint snapshot
//! - [`ledger::LedgerCursorStore`]: a last-loaded row plus a ledger table in the warehouse

pub mod json;
pub mod ledger;
pub mod snapshot;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Result, SyncError};

/// Persistent storage for one job's cursor
#[async_trait]
pub trait CursorStore: Send + Sync {
    type Cursor: Send + Sync;

    /// Current cursor; [`SyncError::CursorNotFound`] when none was ever stored
    async fn read(&self) -> Result<Self::Cursor>;

    /// Replace the stored cursor
    async fn advance(&self, cursor: Self::Cursor) -> Result<()>;
}

/// What to do when a store has no cursor yet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Bootstrap<C> {
    /// Missing cursor is fatal
    #[default]
    Fail,
    /// Start as if nothing had ever been loaded
    StartEmpty,
    /// Start from a configured position
    StartAt(C),
}

/// Read a cursor, resolving a missing one according to `bootstrap`.
///
/// `Ok(None)` means start from the beginning.
pub async fn read_with_bootstrap<S>(store: &S, bootstrap: Bootstrap<S::Cursor>) -> Result<Option<S::Cursor>>
where
    S: CursorStore + ?Sized,
{
    match store.read().await {
        Ok(cursor) => Ok(Some(cursor)),
        Err(SyncError::CursorNotFound(what)) => match bootstrap {
            Bootstrap::Fail => Err(SyncError::CursorNotFound(what)),
            Bootstrap::StartEmpty => {
                warn!(cursor = %what, "No cursor stored, starting from the beginning");
                Ok(None)
            },
            Bootstrap::StartAt(cursor) => {
                warn!(cursor = %what, "No cursor stored, starting from configured position");
                Ok(Some(cursor))
            },
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Missing;

    #[async_trait]
    impl CursorStore for Missing {
        type Cursor = u32;

        async fn read(&self) -> Result<u32> {
            Err(SyncError::CursorNotFound("jobs/cursor.json".into()))
        }

        async fn advance(&self, _cursor: u32) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_cursor_fails_by_default() {
        let err = read_with_bootstrap(&Missing, Bootstrap::Fail).await.unwrap_err();
        assert!(matches!(err, SyncError::CursorNotFound(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_options() {
        assert_eq!(read_with_bootstrap(&Missing, Bootstrap::StartEmpty).await.unwrap(), None);
        assert_eq!(
            read_with_bootstrap(&Missing, Bootstrap::StartAt(7)).await.unwrap(),
            Some(7)
        );
    }
}
