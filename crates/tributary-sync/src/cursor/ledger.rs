//! Warehouse-backed cursor for object feeds
//!
//! Two tables take part:
//!
//! - the cursor table, one row per source: `(source, object_key, last_modified_utc)`
//! - the ledger, one row per loaded object: `(object_key, last_modified_utc)`
//!
//! The ledger is the record of what was loaded. The cursor row is the
//! listing start point and never passes an object that was skipped.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};
use tributary_common::ObjectCursor;

use super::CursorStore;
use crate::error::{Result, SyncError};
use crate::load::sql::{quote_literal, timestamp_literal, QualifiedName};
use crate::transform::timestamps::parse_timestamp;
use crate::warehouse::{Row, StatementRunner};

pub struct LedgerCursorStore {
    runner: StatementRunner,
    source: String,
    cursor_table: QualifiedName,
    ledger_table: QualifiedName,
}

impl LedgerCursorStore {
    pub fn new(
        runner: StatementRunner,
        source: impl Into<String>,
        cursor_table: QualifiedName,
        ledger_table: QualifiedName,
    ) -> Self {
        Self {
            runner,
            source: source.into(),
            cursor_table,
            ledger_table,
        }
    }

    pub fn ledger_table(&self) -> &QualifiedName {
        &self.ledger_table
    }

    /// Statement recording one loaded object in the ledger
    pub fn ledger_append_sql(&self, entry: &ObjectCursor) -> String {
        format!(
            "INSERT INTO {} (object_key, last_modified_utc) VALUES ({}, {});",
            self.ledger_table,
            quote_literal(&entry.object_key),
            timestamp_literal(&entry.last_modified),
        )
    }

    /// Statements replacing this source's cursor row
    pub fn advance_sql(&self, cursor: &ObjectCursor) -> String {
        format!(
            "DELETE FROM {table} WHERE source = {source};\nINSERT INTO {table} (source, object_key, last_modified_utc) VALUES ({source}, {key}, {ts});",
            table = self.cursor_table,
            source = quote_literal(&self.source),
            key = quote_literal(&cursor.object_key),
            ts = timestamp_literal(&cursor.last_modified),
        )
    }

    /// Ledger keys under `prefix` that sort after `after`
    #[instrument(skip(self))]
    pub async fn loaded_keys(&self, prefix: &str, after: Option<&str>) -> Result<HashSet<String>> {
        let mut sql = format!(
            "SELECT object_key FROM {} WHERE object_key LIKE {}",
            self.ledger_table,
            quote_literal(&format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"))),
        );
        if let Some(after) = after {
            sql.push_str(&format!(" AND object_key > {}", quote_literal(after)));
        }
        sql.push(';');

        let keys: HashSet<String> = self
            .runner
            .query(&sql)
            .await?
            .iter()
            .filter_map(|row| row.first().and_then(|cell| cell.as_text()))
            .collect();
        debug!(count = keys.len(), "Fetched ledger keys");
        Ok(keys)
    }

    async fn cursor_row(&self) -> Result<Option<ObjectCursor>> {
        let sql = format!(
            "SELECT object_key, last_modified_utc FROM {} WHERE source = {};",
            self.cursor_table,
            quote_literal(&self.source),
        );
        let rows = self.runner.query(&sql).await?;
        rows.first().map(parse_cursor_row).transpose()
    }

    async fn ledger_max(&self) -> Result<Option<ObjectCursor>> {
        let sql = format!(
            "SELECT object_key, last_modified_utc FROM {} ORDER BY last_modified_utc DESC, object_key DESC LIMIT 1;",
            self.ledger_table,
        );
        let rows = self.runner.query(&sql).await?;
        rows.first().map(parse_cursor_row).transpose()
    }
}

fn parse_cursor_row(row: &Row) -> Result<ObjectCursor> {
    let key = row
        .first()
        .and_then(|c| c.as_text())
        .ok_or_else(|| SyncError::Detection("cursor row has no object key".to_string()))?;
    let raw_ts = row
        .get(1)
        .and_then(|c| c.as_text())
        .ok_or_else(|| SyncError::Detection(format!("cursor row for {} has no timestamp", key)))?;
    let last_modified = parse_timestamp(&raw_ts).ok_or_else(|| {
        SyncError::Detection(format!("cursor row for {} has invalid timestamp '{}'", key, raw_ts))
    })?;
    Ok(ObjectCursor::new(key, last_modified)?)
}

#[async_trait]
impl CursorStore for LedgerCursorStore {
    type Cursor = ObjectCursor;

    #[instrument(skip(self), fields(source = %self.source))]
    async fn read(&self) -> Result<ObjectCursor> {
        if let Some(cursor) = self.cursor_row().await? {
            info!(object_key = %cursor.object_key, "Read last loaded object");
            return Ok(cursor);
        }

        warn!(table = %self.cursor_table, "No cursor row, falling back to ledger");
        match self.ledger_max().await? {
            Some(cursor) => {
                info!(object_key = %cursor.object_key, "Read last loaded object from ledger");
                Ok(cursor)
            },
            None => Err(SyncError::CursorNotFound(format!(
                "{} / {}",
                self.cursor_table, self.ledger_table
            ))),
        }
    }

    async fn advance(&self, cursor: ObjectCursor) -> Result<()> {
        let sql = format!("BEGIN TRANSACTION;\n{}\nEND TRANSACTION;", self.advance_sql(&cursor));
        self.runner.execute(&sql).await?;
        info!(source = %self.source, object_key = %cursor.object_key, "Cursor advanced");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::warehouse::{Cell, PollPolicy, StatementId, StatementStatus, Warehouse};
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    /// Answers SELECTs on the cursor table and the ledger from canned rows
    #[derive(Default)]
    struct TableWarehouse {
        cursor_rows: Vec<Row>,
        ledger_rows: Vec<Row>,
        statements: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Warehouse for TableWarehouse {
        async fn submit(&self, sql: &str) -> Result<StatementId> {
            let mut statements = self.statements.lock().unwrap();
            statements.push(sql.to_string());
            Ok(StatementId(format!("stmt-{}", statements.len() - 1)))
        }

        async fn describe(&self, _id: &StatementId) -> Result<StatementStatus> {
            Ok(StatementStatus::Finished)
        }

        async fn fetch_result(&self, id: &StatementId) -> Result<Vec<Row>> {
            let index: usize = id.0.trim_start_matches("stmt-").parse().unwrap();
            let sql = self.statements.lock().unwrap()[index].clone();
            if sql.contains("ops.last_loaded") {
                Ok(self.cursor_rows.clone())
            } else {
                Ok(self.ledger_rows.clone())
            }
        }
    }

    fn row(key: &str, ts: &str) -> Row {
        vec![Cell::Text(key.into()), Cell::Text(ts.into())]
    }

    fn store(warehouse: Arc<TableWarehouse>) -> LedgerCursorStore {
        LedgerCursorStore::new(
            StatementRunner::new(warehouse, PollPolicy::default()),
            "event_feed",
            QualifiedName::new("ops", "last_loaded").unwrap(),
            QualifiedName::new("ops", "loaded_objects").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_reads_cursor_row_first() {
        let warehouse = Arc::new(TableWarehouse {
            cursor_rows: vec![row("feed/b.gz", "2024-05-01 08:00:00")],
            ledger_rows: vec![row("feed/c.gz", "2024-05-01 09:00:00")],
            ..Default::default()
        });
        let cursor = store(warehouse).read().await.unwrap();
        assert_eq!(cursor.object_key, "feed/b.gz");
        assert_eq!(cursor.last_modified, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_falls_back_to_ledger_max() {
        let warehouse = Arc::new(TableWarehouse {
            ledger_rows: vec![row("feed/c.gz", "2024-05-01 09:00:00")],
            ..Default::default()
        });
        let cursor = store(warehouse.clone()).read().await.unwrap();
        assert_eq!(cursor.object_key, "feed/c.gz");

        let statements = warehouse.statements.lock().unwrap();
        assert!(statements[1].contains("ORDER BY last_modified_utc DESC"));
    }

    #[tokio::test]
    async fn test_nothing_stored() {
        let warehouse = Arc::new(TableWarehouse::default());
        let err = store(warehouse).read().await.unwrap_err();
        assert!(matches!(err, SyncError::CursorNotFound(_)));
    }

    #[tokio::test]
    async fn test_loaded_keys_query() {
        let warehouse = Arc::new(TableWarehouse {
            ledger_rows: vec![vec![Cell::Text("feed/d.gz".into())]],
            ..Default::default()
        });
        let keys = store(warehouse.clone())
            .loaded_keys("feed_v2/", Some("feed_v2/a.gz"))
            .await
            .unwrap();
        assert!(keys.contains("feed/d.gz"));

        let sql = warehouse.statements.lock().unwrap()[0].clone();
        assert!(sql.contains(r"LIKE 'feed\\_v2/%'"));
        assert!(sql.contains("AND object_key > 'feed_v2/a.gz'"));
    }

    #[test]
    fn test_advance_statements() {
        let store = store(Arc::new(TableWarehouse::default()));
        let cursor = ObjectCursor::new(
            "feed/o'brien.gz",
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        )
        .unwrap();

        assert_eq!(
            store.ledger_append_sql(&cursor),
            "INSERT INTO ops.loaded_objects (object_key, last_modified_utc) VALUES ('feed/o''brien.gz', '2024-05-01 08:00:00.000000');"
        );
        let advance = store.advance_sql(&cursor);
        assert!(advance.starts_with("DELETE FROM ops.last_loaded WHERE source = 'event_feed';"));
        assert!(advance.contains("VALUES ('event_feed', 'feed/o''brien.gz'"));
    }
}
