//! User-property push driven by snapshot comparison
//!
//! 1. `UNLOAD` the source table to `<prefix><identifier>_snapshot000.gz`
//! 2. Read the reference `<prefix><identifier>_reference.gz`
//! 3. Diff fingerprints; stop when nothing changed
//! 4. Send one update per changed key, in batches
//! 5. Rewrite the reference, only after every batch was accepted

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::JobReport;
use crate::config::{ProfilesConfig, SyncConfig};
use crate::cursor::snapshot::{Snapshot, SnapshotStore};
use crate::cursor::{read_with_bootstrap, Bootstrap, CursorStore};
use crate::detect::diff::{diff_snapshots, DiffMode};
use crate::error::Result;
use crate::fetch::BackoffPolicy;
use crate::load::sql::unload_script;
use crate::load::QualifiedName;
use crate::push::{BatchSender, PushTarget};
use crate::storage::{object_url, ObjectStore};
use crate::transform::profiles::{ProfileMapper, ProfileUpdate};
use crate::warehouse::StatementRunner;

/// Per-invocation switches
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Send every snapshot record regardless of fingerprints
    pub update_all: bool,
    /// Write the current and next reference here and stop before sending
    pub dry_run: Option<PathBuf>,
}

pub struct ProfileSync {
    store: Arc<dyn ObjectStore>,
    runner: StatementRunner,
    config: ProfilesConfig,
    staging_prefix: String,
    iam_role: String,
    retry: BackoffPolicy,
}

impl ProfileSync {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        runner: StatementRunner,
        config: ProfilesConfig,
        sync: &SyncConfig,
    ) -> Self {
        Self {
            store,
            runner,
            config,
            staging_prefix: sync.staging_prefix.clone(),
            iam_role: sync.warehouse.iam_role.clone(),
            retry: sync.retry,
        }
    }

    /// Key prefix handed to `UNLOAD`
    pub fn snapshot_prefix(&self) -> String {
        format!("{}{}_snapshot", self.staging_prefix, self.config.identifier)
    }

    /// Object `UNLOAD` writes with parallelism off
    pub fn snapshot_key(&self) -> String {
        format!("{}000.gz", self.snapshot_prefix())
    }

    pub fn reference_key(&self) -> String {
        format!("{}{}_reference.gz", self.staging_prefix, self.config.identifier)
    }

    #[instrument(skip(self, target, options), fields(identifier = %self.config.identifier))]
    pub async fn run(
        &self,
        target: &dyn PushTarget<ProfileUpdate>,
        options: &ProfileOptions,
    ) -> Result<JobReport> {
        let mut report = JobReport::new();
        let references = SnapshotStore::new(
            self.store.clone(),
            self.reference_key(),
            self.config.key_column.clone(),
            self.config.fingerprint_column.clone(),
        );

        let current = self.unload_snapshot(&references).await?;

        let bootstrap = if self.config.bootstrap_empty {
            Bootstrap::StartEmpty
        } else {
            Bootstrap::Fail
        };
        let reference = read_with_bootstrap(&references, bootstrap)
            .await?
            .unwrap_or_else(|| {
                Snapshot::empty(&self.config.key_column, &self.config.fingerprint_column)
            });

        let mode = DiffMode::from_update_all(self.config.update_all || options.update_all);
        let delta = diff_snapshots(&reference, &current, mode);
        report.units_detected = delta.len();
        if delta.is_empty() {
            info!("No new or updated records");
            return Ok(report.complete());
        }
        let keys: HashSet<String> = delta.into_units().into_iter().collect();

        let updates = ProfileMapper {
            token: &self.config.token,
            fingerprint_column: &self.config.fingerprint_column,
            rename: &self.config.rename,
        }
        .updates(&current, &keys)?;
        // Built before sending, written only after every batch lands
        let next_reference = reference.merged_with(&current, &keys);

        if let Some(dir) = &options.dry_run {
            write_dry_run(dir, &reference, &next_reference).await?;
            warn!(dir = %dir.display(), updates = updates.len(), "Dry run; nothing sent, reference unchanged");
            return Ok(report.complete());
        }

        let sent = BatchSender::new(self.retry, self.config.batch_size)
            .send_all(target, &updates)
            .await?;
        report.units_loaded = sent.items;
        report.rows = sent.items;
        report.batches = sent.batches;

        references.advance(next_reference).await?;
        report.cursor_advanced = true;
        Ok(report.complete())
    }

    /// Export the source table and read it back
    async fn unload_snapshot(&self, references: &SnapshotStore) -> Result<Snapshot> {
        let source = QualifiedName::new(&self.config.source_schema, &self.config.source_table)?;
        let url = object_url(self.store.as_ref(), &self.snapshot_prefix());
        self.runner
            .execute(&unload_script(&source, &url, &self.iam_role))
            .await?;

        let snapshot = references.load_object(&self.snapshot_key()).await?;
        info!(records = snapshot.len(), source = %source, "Unloaded snapshot");
        Ok(snapshot)
    }
}

async fn write_dry_run(dir: &Path, reference: &Snapshot, next: &Snapshot) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join("reference.csv"), reference.to_csv()?).await?;
    tokio::fs::write(dir.join("updated_reference.csv"), next.to_csv()?).await?;
    Ok(())
}
