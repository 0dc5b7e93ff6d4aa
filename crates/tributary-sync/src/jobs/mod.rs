//! Job orchestration
//!
//! Each job wires the engine stages together for one source:
//!
//! ```text
//! cursor read -> detect -> (empty? stop) -> fetch -> transform -> load/send -> cursor advance
//! ```
//!
//! The cursor is the last thing written. A job that fails anywhere before
//! that leaves the stored position where it was, so the next invocation
//! sees the same units again.

pub mod dbt;
pub mod events;
pub mod profiles;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{error, info, info_span, Instrument};

use crate::error::Result;

pub use dbt::{DbtDataset, DbtSync};
pub use events::EventsSync;
pub use profiles::{ProfileOptions, ProfileSync};

/// What a job invocation did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    /// Units the change detector returned
    pub units_detected: usize,
    /// Units committed to the warehouse or delivered
    pub units_loaded: usize,
    /// Units left pending after a fetch failure
    pub units_skipped: usize,
    /// Rows written or records sent
    pub rows: usize,
    /// Outbound batches sent (push jobs)
    pub batches: usize,
    pub cursor_advanced: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl JobReport {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
        self
    }

    pub fn inc_loaded(&mut self, rows: usize) {
        self.units_loaded += 1;
        self.rows += rows;
    }

    pub fn inc_skipped(&mut self) {
        self.units_skipped += 1;
    }

    /// Nothing was detected, so nothing was touched
    pub fn is_noop(&self) -> bool {
        self.units_detected == 0
    }
}

/// Run `job` inside a span named after it and log how it ended
pub async fn run_job<Fut>(name: &str, job: Fut) -> Result<JobReport>
where
    Fut: Future<Output = Result<JobReport>>,
{
    info!(job = name, "Job started");
    let outcome = job.instrument(info_span!("job", job = name)).await;
    match &outcome {
        Ok(report) if report.is_noop() => {
            info!(job = name, "Nothing new to load");
        },
        Ok(report) => {
            info!(
                job = name,
                detected = report.units_detected,
                loaded = report.units_loaded,
                skipped = report.units_skipped,
                rows = report.rows,
                batches = report.batches,
                cursor_advanced = report.cursor_advanced,
                duration_secs = report.duration_secs,
                "Job finished"
            );
        },
        Err(e) => {
            error!(job = name, kind = %e.kind(), error = %e, "Job failed");
        },
    }
    outcome
}
