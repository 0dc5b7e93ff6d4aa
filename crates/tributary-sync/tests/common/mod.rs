//! Shared fixtures for the job integration tests
//!
//! Jobs run against in-memory stand-ins: [`MemoryObjectStore`] for buckets,
//! [`RecordingWarehouse`] for the statement API, and wiremock servers for
//! HTTP APIs. Configuration is built from a map so the process environment
//! is never read.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tributary_sync::config::{EnvReader, SyncConfig};
use tributary_sync::error::{Result, SyncError};
use tributary_sync::storage::{MemoryObjectStore, ObjectStore, ObjectSummary};
use tributary_sync::warehouse::{PollPolicy, RecordingWarehouse, StatementRunner};

pub const IAM_ROLE: &str = "arn:aws:iam::123456789012:role/WarehouseS3";

/// Variable source over fixed pairs
pub fn env(vars: &[(&str, &str)]) -> EnvReader<impl Fn(&str) -> Option<String>> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvReader::new(move |name: &str| map.get(name).cloned())
}

/// Common variables every job needs; retries are immediate
pub fn base_vars(staging_prefix: &'static str) -> Vec<(&'static str, &'static str)> {
    vec![
        ("WAREHOUSE_DATABASE", "analytics"),
        ("WAREHOUSE_WORKGROUP", "etl"),
        ("WAREHOUSE_IAM_ROLE", IAM_ROLE),
        ("STAGING_BUCKET", "staging"),
        ("STAGING_PREFIX", staging_prefix),
        ("TARGET_SCHEMA", "analytics"),
        ("LOCAL_UTC_OFFSET", "-08:00"),
        ("RETRY_MAX_ATTEMPTS", "3"),
        ("RETRY_CAP_SECS", "0"),
        ("RETRY_JITTER_MIN_SECS", "0"),
        ("RETRY_JITTER_MAX_SECS", "0"),
    ]
}

pub fn sync_config(staging_prefix: &'static str) -> SyncConfig {
    SyncConfig::from_reader(&env(&base_vars(staging_prefix))).unwrap()
}

/// Fake warehouse plus a runner that polls it without delay
pub fn warehouse() -> (Arc<RecordingWarehouse>, StatementRunner) {
    let warehouse = Arc::new(RecordingWarehouse::new());
    let runner = StatementRunner::new(
        warehouse.clone(),
        PollPolicy {
            interval: std::time::Duration::from_millis(1),
            max_wait: std::time::Duration::from_secs(5),
        },
    );
    (warehouse, runner)
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Wraps a [`MemoryObjectStore`] and fails reads of chosen keys
pub struct FlakyStore {
    pub inner: MemoryObjectStore,
    broken: HashSet<String>,
}

impl FlakyStore {
    pub fn new(inner: MemoryObjectStore, broken: &[&str]) -> Self {
        Self {
            inner,
            broken: broken.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn list_after(&self, prefix: &str, after: Option<&str>) -> Result<Vec<ObjectSummary>> {
        self.inner.list_after(prefix, after).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        if self.broken.contains(key) {
            return Err(SyncError::Storage(format!("connection reset reading {}", key)));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.inner.put(key, body, content_type).await
    }
}
