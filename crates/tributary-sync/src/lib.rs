//! Tributary sync library
//!
//! Incremental sync jobs that move analytics data from SaaS APIs and
//! event-delivery buckets into a Redshift-family warehouse.
//!
//! # Jobs
//!
//! - **dbt run details / tests**: newest run of a dbt Cloud job, replaced
//!   wholesale into a warehouse table
//! - **Profile push**: changed rows of a warehouse table sent to a
//!   product-analytics API, found by fingerprint comparison
//! - **Event feed**: new bucket objects upserted one object per transaction
//!
//! Every job runs the same stages: read cursor, detect changes, fetch,
//! transform, load or send, and advance the cursor only after the load
//! committed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tributary_sync::config::{EventsConfig, SyncConfig};
//! use tributary_sync::jobs::{run_job, EventsSync};
//! use tributary_sync::storage::S3Storage;
//! use tributary_sync::warehouse::{RedshiftDataWarehouse, StatementRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sync = SyncConfig::from_env()?;
//!     let events = EventsConfig::from_env()?;
//!     let warehouse = RedshiftDataWarehouse::new(&sync.warehouse).await;
//!     let runner = StatementRunner::new(Arc::new(warehouse), sync.warehouse.poll);
//!     let job = EventsSync::new(
//!         Arc::new(S3Storage::new(&events.feed).await),
//!         Arc::new(S3Storage::new(&sync.staging).await),
//!         runner,
//!         &events,
//!         &sync,
//!     )?;
//!     run_job("load-events", job.run()).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod cursor;
pub mod detect;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod load;
pub mod push;
pub mod storage;
pub mod transform;
pub mod warehouse;

pub use error::{ErrorKind, Result, SyncError};
