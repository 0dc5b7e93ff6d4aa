//! Model and test results from the dbt metadata API
//!
//! Raw records mirror the GraphQL field names; canonical rows add run
//! metadata (link and run start) and paired UTC/local timestamps.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;

use super::classify::{classify_test, TestType};
use super::join::join_by_key;
use super::table::CanonicalRow;
use super::timestamps::{format_timestamp, LocalizedTimestamp};
use crate::detect::runs::RunDescriptor;

// ============================================================================
// Raw records
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawModel {
    pub run_id: i64,
    pub job_id: i64,
    pub unique_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub schema: Option<String>,
    pub error: Option<String>,
    pub status: Option<String>,
    pub skip: Option<bool>,
    pub compile_started_at: Option<String>,
    pub compile_completed_at: Option<String>,
    pub execute_started_at: Option<String>,
    pub execute_completed_at: Option<String>,
    pub execution_time: Option<f64>,
    pub run_generated_at: Option<String>,
    pub run_elapsed_time: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawTest {
    pub run_id: i64,
    pub job_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub state: Option<String>,
    pub column_name: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub fail: Option<bool>,
    pub warn: Option<bool>,
    pub skip: Option<bool>,
}

/// `data` payload of the `models(jobId, runId)` query
#[derive(Debug, Deserialize)]
pub struct ModelsData {
    pub models: Vec<RawModel>,
}

/// `data` payload of the `tests(jobId, runId)` query
#[derive(Debug, Deserialize)]
pub struct TestsData {
    pub tests: Vec<RawTest>,
}

pub fn models_query(job_id: i64, run_id: i64) -> String {
    format!(
        "{{ models(jobId: {job_id}, runId: {run_id}) {{ runId jobId uniqueId name description schema \
         error status skip compileStartedAt compileCompletedAt executeStartedAt executeCompletedAt \
         executionTime runGeneratedAt runElapsedTime }} }}"
    )
}

pub fn tests_query(job_id: i64, run_id: i64) -> String {
    format!(
        "{{ tests(jobId: {job_id}, runId: {run_id}) {{ runId jobId name description state columnName \
         status error fail warn skip }} }}"
    )
}

// ============================================================================
// Run metadata carried onto every row
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub run_id: i64,
    pub href: Option<String>,
    pub run_started_at: LocalizedTimestamp,
}

impl RunMetadata {
    pub fn from_run(run: &RunDescriptor, zone: FixedOffset) -> Self {
        Self {
            run_id: run.id,
            href: run.href.clone(),
            run_started_at: LocalizedTimestamp::new(run.started_at, zone),
        }
    }
}

// ============================================================================
// Canonical rows
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRunRow {
    pub run_id: i64,
    pub job_id: i64,
    pub unique_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub schema: Option<String>,
    pub error: Option<String>,
    pub status: Option<String>,
    pub skip: Option<bool>,
    pub compile_started_at: LocalizedTimestamp,
    pub compile_completed_at: LocalizedTimestamp,
    pub execute_started_at: LocalizedTimestamp,
    pub execute_completed_at: LocalizedTimestamp,
    pub execution_time: Option<f64>,
    pub run_started_at: LocalizedTimestamp,
    pub run_elapsed_time: Option<f64>,
    pub href: Option<String>,
    pub updated_at_local: DateTime<FixedOffset>,
}

impl CanonicalRow for ModelRunRow {
    const COLUMNS: &'static [&'static str] = &[
        "run_id",
        "job_id",
        "unique_id",
        "name",
        "description",
        "schema",
        "error",
        "status",
        "skip",
        "compile_started_at",
        "compile_started_at_local",
        "compile_completed_at",
        "compile_completed_at_local",
        "execute_started_at",
        "execute_started_at_local",
        "execute_completed_at",
        "execute_completed_at_local",
        "execution_time",
        "run_started_at",
        "run_started_at_local",
        "run_elapsed_time",
        "href",
        "updated_at_local",
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.run_id.to_string(),
            self.job_id.to_string(),
            text(&self.unique_id),
            text(&self.name),
            text(&self.description),
            text(&self.schema),
            text(&self.error),
            text(&self.status),
            flag(self.skip),
            self.compile_started_at.utc_cell(),
            self.compile_started_at.local_cell(),
            self.compile_completed_at.utc_cell(),
            self.compile_completed_at.local_cell(),
            self.execute_started_at.utc_cell(),
            self.execute_started_at.local_cell(),
            self.execute_completed_at.utc_cell(),
            self.execute_completed_at.local_cell(),
            number(self.execution_time),
            self.run_started_at.utc_cell(),
            self.run_started_at.local_cell(),
            number(self.run_elapsed_time),
            text(&self.href),
            format_timestamp(&self.updated_at_local),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResultRow {
    pub run_id: i64,
    pub job_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub state: Option<String>,
    pub column_name: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub fail: Option<bool>,
    pub warn: Option<bool>,
    pub skip: Option<bool>,
    pub href: Option<String>,
    pub run_started_at: LocalizedTimestamp,
    pub test_type: TestType,
    pub table_name: String,
    pub updated_at_local: DateTime<FixedOffset>,
}

impl CanonicalRow for TestResultRow {
    const COLUMNS: &'static [&'static str] = &[
        "run_id",
        "job_id",
        "name",
        "description",
        "state",
        "column_name",
        "status",
        "error",
        "fail",
        "warn",
        "skip",
        "href",
        "run_started_at",
        "test_type",
        "table_name",
        "run_started_at_local",
        "updated_at_local",
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.run_id.to_string(),
            self.job_id.to_string(),
            self.name.clone(),
            text(&self.description),
            text(&self.state),
            text(&self.column_name),
            text(&self.status),
            text(&self.error),
            flag(self.fail),
            flag(self.warn),
            flag(self.skip),
            text(&self.href),
            self.run_started_at.utc_cell(),
            self.test_type.to_string(),
            self.table_name.clone(),
            self.run_started_at.local_cell(),
            format_timestamp(&self.updated_at_local),
        ]
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn flag(value: Option<bool>) -> String {
    value.map(|b| b.to_string()).unwrap_or_default()
}

fn number(value: Option<f64>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

// ============================================================================
// Transformations
// ============================================================================

pub fn transform_models(
    raw: Vec<RawModel>,
    runs: &[RunMetadata],
    zone: FixedOffset,
    updated_at: DateTime<Utc>,
) -> Vec<ModelRunRow> {
    let updated_at_local = updated_at.with_timezone(&zone);
    join_by_key(
        raw,
        runs,
        |m| m.run_id,
        |r| r.run_id,
        |m, run| ModelRunRow {
            run_id: m.run_id,
            job_id: m.job_id,
            compile_started_at: LocalizedTimestamp::parse(m.compile_started_at.as_deref(), zone),
            compile_completed_at: LocalizedTimestamp::parse(
                m.compile_completed_at.as_deref(),
                zone,
            ),
            execute_started_at: LocalizedTimestamp::parse(m.execute_started_at.as_deref(), zone),
            execute_completed_at: LocalizedTimestamp::parse(
                m.execute_completed_at.as_deref(),
                zone,
            ),
            unique_id: m.unique_id,
            name: m.name,
            description: m.description,
            schema: m.schema,
            error: m.error,
            status: m.status,
            skip: m.skip,
            execution_time: m.execution_time,
            run_started_at: run.run_started_at,
            run_elapsed_time: m.run_elapsed_time,
            href: run.href.clone(),
            updated_at_local,
        },
    )
}

pub fn transform_tests(
    raw: Vec<RawTest>,
    runs: &[RunMetadata],
    zone: FixedOffset,
    updated_at: DateTime<Utc>,
) -> Vec<TestResultRow> {
    let updated_at_local = updated_at.with_timezone(&zone);
    join_by_key(
        raw,
        runs,
        |t| t.run_id,
        |r| r.run_id,
        |t, run| {
            let classification = classify_test(&t.name, t.column_name.as_deref());
            TestResultRow {
                run_id: t.run_id,
                job_id: t.job_id,
                name: t.name,
                description: t.description,
                state: t.state,
                column_name: t.column_name,
                status: t.status,
                error: t.error,
                fail: t.fail,
                warn: t.warn,
                skip: t.skip,
                href: run.href.clone(),
                run_started_at: run.run_started_at,
                test_type: classification.test_type,
                table_name: classification.table_name,
                updated_at_local,
            }
        },
    )
}
