//! Fetching raw payloads for detected units

pub mod dbt;
pub mod retry;

use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::storage::{ObjectStore, ObjectSummary};

pub use dbt::DbtCloudClient;
pub use retry::BackoffPolicy;

/// Download one listed object.
///
/// Every failure is reported as [`SyncError::Fetch`] so listing jobs can
/// skip the unit and leave it pending for the next run.
pub async fn fetch_object(store: &dyn ObjectStore, object: &ObjectSummary) -> Result<Vec<u8>> {
    match store.get(&object.key).await {
        Ok(bytes) => {
            debug!(key = %object.key, bytes = bytes.len(), "Fetched object");
            Ok(bytes)
        },
        Err(e) => {
            warn!(key = %object.key, error = %e, "Failed to fetch object");
            Err(SyncError::fetch(&object.key, e))
        },
    }
}
