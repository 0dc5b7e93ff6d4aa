//! Diff-based change detection
//!
//! A key is changed when it is missing from the reference or its fingerprint
//! differs. Keys that disappeared from the snapshot are not reported; the
//! push target keeps whatever it last received for them.

use std::collections::{HashMap, HashSet};
use tracing::info;
use tributary_common::Fingerprint;

use super::DeltaSet;
use crate::cursor::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// Only new or changed keys
    #[default]
    Changed,
    /// Every key in the snapshot, regardless of fingerprints
    UpdateAll,
}

impl DiffMode {
    pub fn from_update_all(update_all: bool) -> Self {
        if update_all {
            DiffMode::UpdateAll
        } else {
            DiffMode::Changed
        }
    }
}

/// Keys of `snapshot` that need sending, in snapshot order without duplicates
pub fn diff_keys<'a, I>(
    reference: &HashMap<&str, &Fingerprint>,
    snapshot: I,
    mode: DiffMode,
) -> DeltaSet<String>
where
    I: IntoIterator<Item = (&'a str, &'a Fingerprint)>,
{
    let mut seen = HashSet::new();
    let keys = snapshot
        .into_iter()
        .filter(|(key, _)| seen.insert(*key))
        .filter(|(key, fingerprint)| match mode {
            DiffMode::UpdateAll => true,
            DiffMode::Changed => reference.get(key) != Some(fingerprint),
        })
        .map(|(key, _)| key.to_string())
        .collect();
    DeltaSet::new(keys)
}

/// Compare a fresh snapshot against the stored reference
pub fn diff_snapshots(reference: &Snapshot, current: &Snapshot, mode: DiffMode) -> DeltaSet<String> {
    let reference_index = reference.fingerprints();
    let delta = diff_keys(
        &reference_index,
        current.records().iter().map(|r| (r.key.as_str(), &r.fingerprint)),
        mode,
    );
    info!(
        reference = reference.len(),
        snapshot = current.len(),
        changed = delta.len(),
        mode = ?mode,
        "Compared snapshot fingerprints"
    );
    delta
}
