//! dbt Cloud run details and test results
//!
//! Both datasets follow the same path: pick the newest run of the job,
//! compare it with the run cursor, pull the run's metadata, and replace the
//! target table with the canonical rows.

use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use tracing::{info, instrument};
use tributary_common::RunCursor;

use super::JobReport;
use crate::config::{DbtConfig, SyncConfig};
use crate::cursor::json::JsonCursorStore;
use crate::cursor::{read_with_bootstrap, Bootstrap, CursorStore};
use crate::detect::runs::{resolve_run, run_delta, RunDescriptor, RunSelector};
use crate::error::Result;
use crate::fetch::DbtCloudClient;
use crate::load::{QualifiedName, SwapLoader};
use crate::storage::ObjectStore;
use crate::transform::dbt::{
    models_query, tests_query, transform_models, transform_tests, ModelsData, RunMetadata,
    TestsData,
};
use crate::transform::rows_to_csv;
use crate::warehouse::StatementRunner;

/// Which metadata a job loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbtDataset {
    /// Model executions of the production job
    RunDetails,
    /// Test results of the test job
    Tests,
}

impl DbtDataset {
    pub fn job_id(&self, config: &DbtConfig) -> i64 {
        match self {
            DbtDataset::RunDetails => config.production_job_id,
            DbtDataset::Tests => config.test_job_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbtDataset::RunDetails => "dbt-run-details",
            DbtDataset::Tests => "dbt-tests",
        }
    }
}

/// Key of the run cursor for `table` under the staging prefix
pub fn cursor_key(staging_prefix: &str, table: &str) -> String {
    format!("{}{}.cursor.json", staging_prefix, table)
}

pub struct DbtSync {
    client: DbtCloudClient,
    store: Arc<dyn ObjectStore>,
    loader: SwapLoader,
    config: DbtConfig,
    staging_prefix: String,
    target_schema: String,
    zone: FixedOffset,
}

impl DbtSync {
    pub fn new(
        client: DbtCloudClient,
        store: Arc<dyn ObjectStore>,
        runner: StatementRunner,
        config: DbtConfig,
        sync: &SyncConfig,
    ) -> Self {
        let loader = SwapLoader::new(
            store.clone(),
            runner,
            sync.staging_prefix.clone(),
            sync.warehouse.iam_role.clone(),
        );
        Self {
            client,
            store,
            loader,
            config,
            staging_prefix: sync.staging_prefix.clone(),
            target_schema: sync.target_schema.clone(),
            zone: sync.local_offset,
        }
    }

    /// Load `dataset` for the newest run (or `run_id`) into `target_table`
    #[instrument(skip(self), fields(dataset = dataset.as_str()))]
    pub async fn run(
        &self,
        dataset: DbtDataset,
        target_table: &str,
        run_id: Option<i64>,
    ) -> Result<JobReport> {
        let mut report = JobReport::new();
        let target = QualifiedName::new(&self.target_schema, target_table)?;

        let selector = RunSelector {
            job_id: dataset.job_id(&self.config),
            limit: self.config.run_list_limit,
            scheduled_only: self.config.scheduled_only,
        };
        let selection = resolve_run(&self.client, &selector, run_id).await?;

        let cursors: JsonCursorStore<RunCursor> =
            JsonCursorStore::new(self.store.clone(), cursor_key(&self.staging_prefix, target.table()));
        let stored = read_with_bootstrap(&cursors, Bootstrap::StartEmpty).await?;

        let delta = run_delta(selection, stored.as_ref());
        report.units_detected = delta.len();
        let Some(run) = delta.into_units().into_iter().next() else {
            return Ok(report.complete());
        };

        let csv = self.fetch_and_transform(dataset, &run, &mut report).await?;
        self.loader.replace(&target, csv).await?;
        report.units_loaded = 1;

        let cursor = run.cursor();
        report.cursor_advanced = stored.as_ref().map_or(true, |s| cursor > *s);
        cursors.advance(cursor).await?;

        info!(run_id = run.id, rows = report.rows, target = %target, "Run loaded");
        Ok(report.complete())
    }

    async fn fetch_and_transform(
        &self,
        dataset: DbtDataset,
        run: &RunDescriptor,
        report: &mut JobReport,
    ) -> Result<Vec<u8>> {
        let runs = [RunMetadata::from_run(run, self.zone)];
        let updated_at = Utc::now();

        match dataset {
            DbtDataset::RunDetails => {
                let data: ModelsData = self
                    .client
                    .query_metadata(&models_query(run.job_definition_id, run.id))
                    .await?;
                let rows = transform_models(data.models, &runs, self.zone, updated_at);
                report.rows = rows.len();
                rows_to_csv(&rows)
            },
            DbtDataset::Tests => {
                let data: TestsData = self
                    .client
                    .query_metadata(&tests_query(run.job_definition_id, run.id))
                    .await?;
                let rows = transform_tests(data.tests, &runs, self.zone, updated_at);
                report.rows = rows.len();
                rows_to_csv(&rows)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cursor_key_sits_next_to_staged_csv() {
        assert_eq!(cursor_key("dbt/", "run_details"), "dbt/run_details.cursor.json");
        assert_eq!(cursor_key("", "tests"), "tests.cursor.json");
    }

    #[test]
    fn test_dataset_picks_job() {
        let config = DbtConfig {
            account_id: 1,
            api_token: "t".into(),
            api_base_url: "http://localhost".into(),
            metadata_url: "http://localhost/graphql".into(),
            production_job_id: 7,
            test_job_id: 8,
            run_list_limit: 10,
            scheduled_only: true,
            request_timeout: Duration::from_secs(1),
        };
        assert_eq!(DbtDataset::RunDetails.job_id(&config), 7);
        assert_eq!(DbtDataset::Tests.job_id(&config), 8);
    }
}
