//! Full-table replacement

use std::sync::Arc;
use tracing::{info, instrument};
use tributary_common::fingerprint::{compute_fingerprint, FingerprintAlgorithm};
use tributary_common::Fingerprint;

use super::sql::{replace_table_script, QualifiedName};
use crate::error::Result;
use crate::storage::{object_url, ObjectStore};
use crate::warehouse::{StatementId, StatementRunner};

/// What a committed swap left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    pub staged_key: String,
    /// SHA-256 of the staged file
    pub checksum: Fingerprint,
    pub statement_id: StatementId,
}

pub struct SwapLoader {
    store: Arc<dyn ObjectStore>,
    runner: StatementRunner,
    staging_prefix: String,
    iam_role: String,
}

impl SwapLoader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        runner: StatementRunner,
        staging_prefix: impl Into<String>,
        iam_role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            runner,
            staging_prefix: staging_prefix.into(),
            iam_role: iam_role.into(),
        }
    }

    pub fn staged_key(&self, target: &QualifiedName) -> String {
        format!("{}{}.csv", self.staging_prefix, target.table())
    }

    /// Stage `csv` and replace the contents of `target` with it
    #[instrument(skip(self, csv), fields(target = %target, bytes = csv.len()))]
    pub async fn replace(&self, target: &QualifiedName, csv: Vec<u8>) -> Result<SwapOutcome> {
        let staged_key = self.staged_key(target);
        let checksum = compute_fingerprint(&mut csv.as_slice(), FingerprintAlgorithm::Sha256)?;
        self.store.put(&staged_key, csv, "text/csv").await?;

        let url = object_url(self.store.as_ref(), &staged_key);
        let statement_id = self
            .runner
            .execute(&replace_table_script(target, &url, &self.iam_role))
            .await?;

        info!(staged = %staged_key, checksum = %checksum, "Target table replaced");
        Ok(SwapOutcome {
            staged_key,
            checksum,
            statement_id,
        })
    }
}
