//! Run-based change detection
//!
//! Picks the newest run of a job, optionally ignoring manually triggered
//! runs. An explicit run id bypasses discovery entirely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tributary_common::RunCursor;

use super::DeltaSet;
use crate::error::{Result, SyncError};

/// One run as reported by the source API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub id: i64,
    pub job_definition_id: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub href: Option<String>,
    pub trigger_cause: Option<String>,
}

impl RunDescriptor {
    /// Scheduler-triggered runs carry a trigger cause mentioning the schedule
    pub fn is_scheduled(&self) -> bool {
        self.trigger_cause
            .as_deref()
            .map(|cause| cause.to_ascii_lowercase().contains("schedule"))
            .unwrap_or(false)
    }

    pub fn cursor(&self) -> RunCursor {
        RunCursor {
            run_id: self.id,
            created_at: self.created_at,
        }
    }
}

/// Filter passed to the source's run listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    pub job_id: i64,
    pub limit: u32,
}

/// Source of run descriptors
#[async_trait]
pub trait RunSource: Send + Sync {
    /// Most recent runs of a job, newest first
    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunDescriptor>>;

    async fn get_run(&self, run_id: i64) -> Result<RunDescriptor>;
}

/// How to discover the run to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSelector {
    pub job_id: i64,
    pub limit: u32,
    pub scheduled_only: bool,
}

/// The run chosen for this invocation and how it was chosen
#[derive(Debug, Clone, PartialEq)]
pub enum RunSelection {
    /// Supplied by the caller; loaded regardless of the cursor
    Explicit(RunDescriptor),
    /// Newest matching run found by discovery
    Latest(RunDescriptor),
}

impl RunSelection {
    pub fn run(&self) -> &RunDescriptor {
        match self {
            RunSelection::Explicit(run) | RunSelection::Latest(run) => run,
        }
    }

    pub fn into_run(self) -> RunDescriptor {
        match self {
            RunSelection::Explicit(run) | RunSelection::Latest(run) => run,
        }
    }
}

/// Newest run by creation time, ties broken by the larger id
pub fn select_latest(runs: &[RunDescriptor], scheduled_only: bool) -> Option<&RunDescriptor> {
    runs.iter()
        .filter(|run| !scheduled_only || run.is_scheduled())
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.id.cmp(&b.id))
        })
}

/// Resolve which run to load
pub async fn resolve_run(
    source: &dyn RunSource,
    selector: &RunSelector,
    explicit_run_id: Option<i64>,
) -> Result<RunSelection> {
    if let Some(run_id) = explicit_run_id {
        info!(run_id, "Run id supplied; skipping discovery");
        let run = source.get_run(run_id).await?;
        return Ok(RunSelection::Explicit(run));
    }

    if selector.limit == 0 {
        return Err(SyncError::Detection(
            "run listing limit must be greater than 0".to_string(),
        ));
    }

    let runs = source
        .list_runs(&RunQuery {
            job_id: selector.job_id,
            limit: selector.limit,
        })
        .await?;
    debug!(job_id = selector.job_id, candidates = runs.len(), "Fetched recent runs");

    let latest = select_latest(&runs, selector.scheduled_only).ok_or_else(|| {
        SyncError::Detection(format!(
            "no {}runs found among the last {} of job {}",
            if selector.scheduled_only { "scheduled " } else { "" },
            selector.limit,
            selector.job_id
        ))
    })?;

    info!(run_id = latest.id, created_at = %latest.created_at, "Selected most recent run");
    Ok(RunSelection::Latest(latest.clone()))
}

/// Delta for a run-based source: the selected run unless it is already loaded
pub fn run_delta(selection: RunSelection, cursor: Option<&RunCursor>) -> DeltaSet<RunDescriptor> {
    match (selection, cursor) {
        (RunSelection::Explicit(run), _) => DeltaSet::new(vec![run]),
        (RunSelection::Latest(run), Some(stored)) if run.cursor() <= *stored => {
            info!(run_id = run.id, cursor = %stored, "Most recent run already loaded");
            DeltaSet::empty()
        },
        (RunSelection::Latest(run), _) => DeltaSet::new(vec![run]),
    }
}
