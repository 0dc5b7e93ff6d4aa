//! Event feed objects into the warehouse, one object per transaction
//!
//! Objects are processed in key order. One that cannot be fetched is
//! skipped and stays pending: it is never written to the ledger, and from
//! that point on the cursor row stops moving so the next listing still
//! starts before it. Objects loaded after the skip land in the ledger only,
//! which keeps them out of the next run's delta.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use tributary_common::ObjectCursor;

use super::JobReport;
use crate::config::{EventsConfig, SyncConfig};
use crate::cursor::ledger::LedgerCursorStore;
use crate::cursor::{read_with_bootstrap, Bootstrap};
use crate::detect::listing::list_pending;
use crate::detect::EmptyDeltaPolicy;
use crate::error::{Result, SyncError};
use crate::fetch::fetch_object;
use crate::load::upsert::UnitPosition;
use crate::load::{QualifiedName, UpsertLoader};
use crate::storage::ObjectStore;
use crate::transform::events::{decode_events, EventLayout};
use crate::warehouse::StatementRunner;

pub struct EventsSync {
    feed: Arc<dyn ObjectStore>,
    ledger: LedgerCursorStore,
    loader: UpsertLoader,
    layout: EventLayout,
    feed_prefix: String,
    start_after: Option<String>,
    empty_policy: EmptyDeltaPolicy,
}

impl EventsSync {
    pub fn new(
        feed: Arc<dyn ObjectStore>,
        staging: Arc<dyn ObjectStore>,
        runner: StatementRunner,
        config: &EventsConfig,
        sync: &SyncConfig,
    ) -> Result<Self> {
        let ledger = LedgerCursorStore::new(
            runner.clone(),
            config.source_name.clone(),
            QualifiedName::new(&config.ledger_schema, &config.cursor_table)?,
            QualifiedName::new(&config.ledger_schema, &config.ledger_table)?,
        );
        let loader = UpsertLoader::new(
            staging,
            runner,
            sync.staging_prefix.clone(),
            config.feed_prefix.clone(),
            sync.warehouse.iam_role.clone(),
            QualifiedName::new(&sync.target_schema, &config.target_table)?,
            config.key_column.clone(),
            config.split_temp_tables,
        );
        Ok(Self {
            feed,
            ledger,
            loader,
            layout: config.layout(),
            feed_prefix: config.feed_prefix.clone(),
            start_after: config.start_after.clone(),
            empty_policy: config.empty_policy,
        })
    }

    fn bootstrap(&self) -> Result<Bootstrap<ObjectCursor>> {
        match &self.start_after {
            Some(key) => Ok(Bootstrap::StartAt(ObjectCursor::new(
                key.clone(),
                DateTime::<Utc>::UNIX_EPOCH,
            )?)),
            None => Ok(Bootstrap::Fail),
        }
    }

    #[instrument(skip(self), fields(bucket = self.feed.bucket(), prefix = %self.feed_prefix))]
    pub async fn run(&self) -> Result<JobReport> {
        let mut report = JobReport::new();

        let cursor = read_with_bootstrap(&self.ledger, self.bootstrap()?).await?;
        let after = cursor.as_ref().map(|c| c.object_key.as_str());
        let loaded = self.ledger.loaded_keys(&self.feed_prefix, after).await?;
        let delta = list_pending(self.feed.as_ref(), &self.feed_prefix, cursor.as_ref(), &loaded).await?;

        report.units_detected = delta.len();
        if delta.is_empty() {
            return match self.empty_policy {
                EmptyDeltaPolicy::Succeed => {
                    info!("No new objects in feed");
                    Ok(report.complete())
                },
                EmptyDeltaPolicy::Fail => Err(SyncError::EmptyDelta(format!(
                    "s3://{}/{}",
                    self.feed.bucket(),
                    self.feed_prefix
                ))),
            };
        }

        let mut skipped = false;
        for (i, object) in delta.into_iter().enumerate() {
            let bytes = match fetch_object(self.feed.as_ref(), &object).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Skipping object; it stays pending");
                    skipped = true;
                    report.inc_skipped();
                    continue;
                },
            };

            let table = decode_events(&bytes, &self.layout)?;
            let unit = ObjectCursor::new(object.key, object.last_modified)?;
            let position = UnitPosition {
                index: i + 1,
                advance_cursor: !skipped,
            };
            self.loader
                .load_unit(&unit, &table, position, &self.ledger)
                .await?;

            report.inc_loaded(table.len());
            report.cursor_advanced |= position.advance_cursor;
        }

        Ok(report.complete())
    }
}
