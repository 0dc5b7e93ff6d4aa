//! Warehouse statement execution
//!
//! The warehouse runs statements asynchronously: submitting returns an id,
//! the id is polled until the statement reaches a terminal state, and rows
//! are fetched afterwards. [`StatementRunner`] wraps that protocol in a
//! bounded poll loop so a stuck statement fails the job instead of hanging it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::error::{Result, SyncError};

pub mod recording;
pub mod redshift;

pub use recording::RecordingWarehouse;
pub use redshift::RedshiftDataWarehouse;

/// Identifier returned when a statement is submitted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementId(pub String);

impl std::fmt::Display for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementStatus {
    Submitted,
    Picked,
    Started,
    Finished,
    Failed(String),
    Aborted,
}

impl StatementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatementStatus::Finished | StatementStatus::Failed(_) | StatementStatus::Aborted
        )
    }
}

/// A typed result cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl Cell {
    /// Textual form of the cell; `None` for NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Long(n) => Some(n.to_string()),
            Cell::Double(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
        }
    }
}

pub type Row = Vec<Cell>;

/// Asynchronous statement API of the warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn submit(&self, sql: &str) -> Result<StatementId>;

    async fn describe(&self, id: &StatementId) -> Result<StatementStatus>;

    async fn fetch_result(&self, id: &StatementId) -> Result<Vec<Row>>;
}

/// Poll cadence and total wait budget for one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_wait: Duration::from_secs(900),
        }
    }
}

/// Submits statements and waits for them within the poll budget
#[derive(Clone)]
pub struct StatementRunner {
    warehouse: Arc<dyn Warehouse>,
    policy: PollPolicy,
}

impl StatementRunner {
    pub fn new(warehouse: Arc<dyn Warehouse>, policy: PollPolicy) -> Self {
        Self { warehouse, policy }
    }

    /// Run a statement to completion
    #[instrument(skip(self, sql), fields(statement = %summarize(sql)))]
    pub async fn execute(&self, sql: &str) -> Result<StatementId> {
        let id = self.warehouse.submit(sql).await?;
        debug!(statement_id = %id, "Statement submitted");
        self.wait(&id).await?;
        Ok(id)
    }

    /// Run a query to completion and return its rows
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let id = self.execute(sql).await?;
        let rows = self.warehouse.fetch_result(&id).await?;
        debug!(statement_id = %id, rows = rows.len(), "Fetched statement result");
        Ok(rows)
    }

    /// Poll until the statement is terminal or the wait budget is spent
    pub async fn wait(&self, id: &StatementId) -> Result<()> {
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            let status = self.warehouse.describe(id).await?;
            polls += 1;
            match status {
                StatementStatus::Finished => {
                    info!(statement_id = %id, polls, elapsed = ?started.elapsed(), "Statement finished");
                    return Ok(());
                },
                StatementStatus::Failed(message) => {
                    error!(statement_id = %id, error = %message, "Statement failed");
                    return Err(SyncError::StatementFailed {
                        statement_id: id.0.clone(),
                        message,
                    });
                },
                StatementStatus::Aborted => {
                    error!(statement_id = %id, "Statement aborted");
                    return Err(SyncError::StatementAborted {
                        statement_id: id.0.clone(),
                    });
                },
                pending => {
                    let waited = started.elapsed();
                    if waited >= self.policy.max_wait {
                        error!(statement_id = %id, ?waited, "Statement exceeded wait budget");
                        return Err(SyncError::StatementTimeout {
                            statement_id: id.0.clone(),
                            waited,
                        });
                    }
                    debug!(statement_id = %id, status = ?pending, "Statement still running");
                    let remaining = self.policy.max_wait - waited;
                    tokio::time::sleep(self.policy.interval.min(remaining)).await;
                },
            }
        }
    }
}

/// First line of a statement, trimmed, for log fields
fn summarize(sql: &str) -> String {
    let first = sql
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    if first.len() > 80 {
        let cut = (0..=80).rev().find(|i| first.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &first[..cut])
    } else {
        first.to_string()
    }
}
