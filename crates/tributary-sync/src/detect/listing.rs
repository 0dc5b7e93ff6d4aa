//! Listing-based change detection
//!
//! Feed object keys embed their delivery time, so lexicographic order is
//! delivery order. Everything strictly above the cursor key is pending,
//! except objects the ledger already records (units loaded after an earlier
//! unit was skipped).

use std::collections::HashSet;
use tracing::{debug, info};
use tributary_common::ObjectCursor;

use super::DeltaSet;
use crate::error::Result;
use crate::storage::{ObjectStore, ObjectSummary};

/// Objects under `prefix` that still need loading, sorted by key
pub async fn list_pending(
    store: &dyn ObjectStore,
    prefix: &str,
    cursor: Option<&ObjectCursor>,
    loaded: &HashSet<String>,
) -> Result<DeltaSet<ObjectSummary>> {
    let after = cursor.map(|c| c.object_key.as_str());
    debug!(bucket = store.bucket(), prefix, after = ?after, "Listing objects above cursor");

    let mut objects: Vec<ObjectSummary> = store
        .list_after(prefix, after)
        .await?
        .into_iter()
        .filter(|o| cursor.map_or(true, |c| c.precedes(&o.key)))
        .filter(|o| !o.key.ends_with('/'))
        .collect();
    let listed = objects.len();

    objects.retain(|o| !loaded.contains(&o.key));
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    objects.dedup_by(|a, b| a.key == b.key);

    info!(
        listed,
        already_loaded = listed - objects.len(),
        pending = objects.len(),
        "Computed pending objects"
    );
    Ok(DeltaSet::new(objects))
}
