//! Fingerprint snapshots and the reference file that stores them
//!
//! Snapshots are gzip-compressed, pipe-delimited CSV files with a header
//! line, the format the warehouse `UNLOAD` produces. Each record has a key
//! column and, usually, a fingerprint column computed in SQL.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, instrument};
use tributary_common::Fingerprint;

use super::CursorStore;
use crate::error::{Result, SyncError};
use crate::storage::ObjectStore;

const DELIMITER: u8 = b'|';

/// One snapshot row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: String,
    pub fingerprint: Fingerprint,
    /// Cell values aligned with [`Snapshot::headers`]
    pub values: Vec<String>,
}

/// A full table snapshot with per-key fingerprints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    headers: Vec<String>,
    key_column: String,
    fingerprint_column: String,
    records: Vec<SnapshotRecord>,
}

impl Snapshot {
    /// An empty reference, used when bootstrapping a first run
    pub fn empty(key_column: &str, fingerprint_column: &str) -> Self {
        Self {
            headers: vec![key_column.to_string(), fingerprint_column.to_string()],
            key_column: key_column.to_string(),
            fingerprint_column: fingerprint_column.to_string(),
            records: Vec::new(),
        }
    }

    /// Decode a gzip pipe-delimited file.
    ///
    /// When `fingerprint_column` is not in the header, each record's
    /// fingerprint is computed from all of its cells.
    pub fn decode(bytes: &[u8], key_column: &str, fingerprint_column: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .from_reader(GzDecoder::new(bytes));

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let key_index = headers.iter().position(|h| h == key_column).ok_or_else(|| {
            SyncError::transform(format!("snapshot has no '{}' column", key_column))
        })?;
        let fingerprint_index = headers.iter().position(|h| h == fingerprint_column);

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let values: Vec<String> = row.iter().map(str::to_string).collect();
            let key = values.get(key_index).cloned().unwrap_or_default();
            if key.is_empty() {
                return Err(SyncError::transform(format!(
                    "snapshot row {} has an empty '{}'",
                    records.len() + 1,
                    key_column
                )));
            }
            let fingerprint = match fingerprint_index.and_then(|i| values.get(i)) {
                Some(digest) => Fingerprint::parse(digest)?,
                None => Fingerprint::of_fields(&values),
            };
            records.push(SnapshotRecord {
                key,
                fingerprint,
                values,
            });
        }

        Ok(Self {
            headers,
            key_column: key_column.to_string(),
            fingerprint_column: fingerprint_column.to_string(),
            records,
        })
    }

    /// Encode in the same format [`Snapshot::decode`] reads
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_writer(GzEncoder::new(Vec::new(), Compression::default()));
        writer.write_record(&self.headers)?;
        for record in &self.records {
            writer.write_record(&record.values)?;
        }
        let encoder = writer
            .into_inner()
            .map_err(|e| SyncError::Io(e.into_error()))?;
        Ok(encoder.finish()?)
    }

    /// Plain comma-separated copy for inspection (dry runs)
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for record in &self.records {
            writer.write_record(&record.values)?;
        }
        writer
            .into_inner()
            .map_err(|e| SyncError::Io(e.into_error()))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[SnapshotRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn fingerprints(&self) -> HashMap<&str, &Fingerprint> {
        self.records
            .iter()
            .map(|r| (r.key.as_str(), &r.fingerprint))
            .collect()
    }

    /// Records of this snapshot whose key is in `keys`, in snapshot order
    pub fn select<'a>(&'a self, keys: &'a HashSet<String>) -> impl Iterator<Item = &'a SnapshotRecord> {
        self.records.iter().filter(move |r| keys.contains(&r.key))
    }

    /// Next reference: this reference without `keys`, plus `current`'s rows for `keys`.
    ///
    /// The result uses `current`'s header; carried-over rows are projected
    /// onto it by column name, with blanks for columns they never had.
    pub fn merged_with(&self, current: &Snapshot, keys: &HashSet<String>) -> Snapshot {
        let projection: Vec<Option<usize>> = current
            .headers
            .iter()
            .map(|h| self.headers.iter().position(|own| own == h))
            .collect();
        let fingerprint_slot = current
            .headers
            .iter()
            .position(|h| *h == current.fingerprint_column);

        let carried = self
            .records
            .iter()
            .filter(|r| !keys.contains(&r.key))
            .map(|r| {
                let mut values: Vec<String> = projection
                    .iter()
                    .map(|idx| idx.and_then(|i| r.values.get(i).cloned()).unwrap_or_default())
                    .collect();
                if let Some(slot) = fingerprint_slot {
                    values[slot] = r.fingerprint.to_string();
                }
                SnapshotRecord {
                    key: r.key.clone(),
                    fingerprint: r.fingerprint.clone(),
                    values,
                }
            });
        let fresh = current.select(keys).cloned();

        Snapshot {
            headers: current.headers.clone(),
            key_column: current.key_column.clone(),
            fingerprint_column: current.fingerprint_column.clone(),
            records: carried.chain(fresh).collect(),
        }
    }
}

/// Reference snapshot persisted as one object in the staging bucket
pub struct SnapshotStore {
    store: Arc<dyn ObjectStore>,
    key: String,
    key_column: String,
    fingerprint_column: String,
}

impl SnapshotStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        key_column: impl Into<String>,
        fingerprint_column: impl Into<String>,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            key_column: key_column.into(),
            fingerprint_column: fingerprint_column.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Decode another object with this store's column conventions
    pub async fn load_object(&self, key: &str) -> Result<Snapshot> {
        let bytes = self.store.get(key).await?;
        Snapshot::decode(&bytes, &self.key_column, &self.fingerprint_column)
    }
}

#[async_trait]
impl CursorStore for SnapshotStore {
    type Cursor = Snapshot;

    #[instrument(skip(self), fields(key = %self.key))]
    async fn read(&self) -> Result<Snapshot> {
        match self.load_object(&self.key).await {
            Ok(snapshot) => {
                info!(records = snapshot.len(), "Loaded reference snapshot");
                Ok(snapshot)
            },
            Err(SyncError::ObjectNotFound(_)) => Err(SyncError::CursorNotFound(self.key.clone())),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, cursor), fields(key = %self.key, records = cursor.len()))]
    async fn advance(&self, cursor: Snapshot) -> Result<()> {
        let body = cursor.encode()?;
        self.store.put(&self.key, body, "application/gzip").await?;
        info!("Reference snapshot rewritten");
        Ok(())
    }
}

/// Gzip `bytes`; used by tests and dry runs to produce fixture files
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}
