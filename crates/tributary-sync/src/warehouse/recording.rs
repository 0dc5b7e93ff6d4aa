//! A [`Warehouse`] that records statements instead of running them
//!
//! Statements finish immediately. Canned result rows and failures are
//! matched by substring against the submitted SQL; the first matching rule
//! wins.

use async_trait::async_trait;
use std::sync::Mutex;

use super::{Row, StatementId, StatementStatus, Warehouse};
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
pub struct RecordingWarehouse {
    statements: Mutex<Vec<String>>,
    results: Mutex<Vec<(String, Vec<Row>)>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl RecordingWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `rows` for statements containing `pattern`
    pub fn respond_when(&self, pattern: &str, rows: Vec<Row>) -> &Self {
        lock(&self.results).push((pattern.to_string(), rows));
        self
    }

    /// Fail statements containing `pattern` with `message`
    pub fn fail_when(&self, pattern: &str, message: &str) -> &Self {
        lock(&self.failures).push((pattern.to_string(), message.to_string()));
        self
    }

    /// Every submitted statement, in order
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    /// Submitted statements containing `pattern`
    pub fn statements_matching(&self, pattern: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.contains(pattern))
            .collect()
    }

    fn statement(&self, id: &StatementId) -> Result<String> {
        id.0.parse::<usize>()
            .ok()
            .and_then(|index| lock(&self.statements).get(index).cloned())
            .ok_or_else(|| SyncError::Warehouse(format!("unknown statement {}", id)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn submit(&self, sql: &str) -> Result<StatementId> {
        let mut statements = lock(&self.statements);
        statements.push(sql.to_string());
        Ok(StatementId((statements.len() - 1).to_string()))
    }

    async fn describe(&self, id: &StatementId) -> Result<StatementStatus> {
        let sql = self.statement(id)?;
        let failure = lock(&self.failures)
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, message)| message.clone());
        Ok(match failure {
            Some(message) => StatementStatus::Failed(message),
            None => StatementStatus::Finished,
        })
    }

    async fn fetch_result(&self, id: &StatementId) -> Result<Vec<Row>> {
        let sql = self.statement(id)?;
        Ok(lock(&self.results)
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}
