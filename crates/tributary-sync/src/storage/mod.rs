//! Object storage for staged files, reference snapshots and feed listings

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::error::{Result, SyncError};

pub mod config;
pub mod memory;

pub use config::StorageConfig;
pub use memory::MemoryObjectStore;

/// Key and modification time of a listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Objects under `prefix` whose key sorts strictly after `start_after`,
    /// in ascending key order
    async fn list_after(&self, prefix: &str, start_after: Option<&str>) -> Result<Vec<ObjectSummary>>;

    /// Whole object body; a missing key is [`SyncError::ObjectNotFound`]
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
}

/// `s3://bucket/key` form used in warehouse COPY and UNLOAD statements
pub fn object_url(store: &dyn ObjectStore, key: &str) -> String {
    format!("s3://{}/{}", store.bucket(), key)
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(config: &StorageConfig) -> Self {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing storage");

        let mut builder = match &config.credentials {
            Some(creds) => aws_sdk_s3::Config::builder()
                .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                .credentials_provider(Credentials::new(
                    &creds.access_key,
                    &creds.secret_key,
                    None,
                    None,
                    "tributary-storage",
                ))
                .region(Region::new(config.region.clone())),
            None => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        }
        .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(bucket = %config.bucket, "Storage client initialized");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

fn storage_error(action: &str, key: &str, err: impl std::error::Error) -> SyncError {
    SyncError::Storage(format!("Failed to {} {}: {}", action, key, DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStore for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_after(&self, prefix: &str, start_after: Option<&str>) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_start_after(start_after.map(str::to_string))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| storage_error("list", prefix, e))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()))
                    .unwrap_or_default();
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    last_modified,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                },
                _ => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(count = objects.len(), "Listed objects");
        Ok(objects)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) => {
                return Err(SyncError::ObjectNotFound(key.to_string()))
            },
            Err(e) => return Err(storage_error("download", key, e)),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| SyncError::Storage(format!("Failed to read body of {}: {}", key, e)))?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "Downloaded object");
        Ok(data)
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, bytes = body.len()))]
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| storage_error("upload", key, e))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }
}
