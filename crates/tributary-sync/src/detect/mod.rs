//! Change detection
//!
//! Three strategies compute the units of work that are new since the stored
//! cursor:
//!
//! - [`runs`]: newest run of a job (run-metadata sources)
//! - [`diff`]: per-key fingerprint comparison of two snapshots
//! - [`listing`]: bucket objects that sort after the cursor key

pub mod diff;
pub mod listing;
pub mod runs;

use serde::{Deserialize, Serialize};

/// Ordered units of work computed relative to a cursor
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaSet<T> {
    units: Vec<T>,
}

impl<T> DeltaSet<T> {
    pub fn new(units: Vec<T>) -> Self {
        Self { units }
    }

    pub fn empty() -> Self {
        Self { units: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.units.iter()
    }

    pub fn into_units(self) -> Vec<T> {
        self.units
    }
}

impl<T> IntoIterator for DeltaSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_iter()
    }
}

/// What a job does when detection finds nothing new
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyDeltaPolicy {
    /// Exit successfully without touching anything
    #[default]
    Succeed,
    /// Treat an empty delta as a failure (e.g. a feed that should never stall)
    Fail,
}

impl std::str::FromStr for EmptyDeltaPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "succeed" | "success" | "skip" => Ok(EmptyDeltaPolicy::Succeed),
            "fail" | "error" => Ok(EmptyDeltaPolicy::Fail),
            other => Err(format!("unknown empty-delta policy '{}'", other)),
        }
    }
}
