//! Per-object upsert with ledger bookkeeping
//!
//! Each object is committed by one script: the upsert statements, the
//! ledger entry, and (when allowed) the cursor row. Either all of it lands
//! or none of it does.

use std::sync::Arc;
use tracing::{info, instrument};
use tributary_common::ObjectCursor;

use super::sql::{QualifiedName, UpsertStatements};
use crate::cursor::ledger::LedgerCursorStore;
use crate::error::Result;
use crate::storage::{object_url, ObjectStore};
use crate::transform::events::staged_key;
use crate::transform::Table;
use crate::warehouse::StatementRunner;

pub struct UpsertLoader {
    store: Arc<dyn ObjectStore>,
    runner: StatementRunner,
    staging_prefix: String,
    feed_prefix: String,
    iam_role: String,
    target: QualifiedName,
    key_column: String,
    /// Distinguishes this run's scratch tables from any other run's
    run_tag: String,
    split_temp_tables: bool,
}

/// Where in the run a unit sits, for scratch naming and cursor handling
#[derive(Debug, Clone, Copy)]
pub struct UnitPosition {
    /// 1-based index among the run's units
    pub index: usize,
    /// Whether the cursor row may move to this unit
    pub advance_cursor: bool,
}

impl UpsertLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        runner: StatementRunner,
        staging_prefix: impl Into<String>,
        feed_prefix: impl Into<String>,
        iam_role: impl Into<String>,
        target: QualifiedName,
        key_column: impl Into<String>,
        split_temp_tables: bool,
    ) -> Self {
        let run_tag = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            store,
            runner,
            staging_prefix: staging_prefix.into(),
            feed_prefix: feed_prefix.into(),
            iam_role: iam_role.into(),
            target,
            key_column: key_column.into(),
            run_tag,
            split_temp_tables,
        }
    }

    pub fn temp_table(&self, index: usize) -> Result<QualifiedName> {
        let name = if self.split_temp_tables {
            format!("{}_temp_{}_{}", self.target.table(), self.run_tag, index)
        } else {
            format!("{}_temp_{}", self.target.table(), self.run_tag)
        };
        self.target.sibling(name)
    }

    /// The full commit script for one unit
    pub fn unit_script(
        &self,
        object: &ObjectCursor,
        columns: &[String],
        url: &str,
        position: UnitPosition,
        ledger: &LedgerCursorStore,
    ) -> Result<String> {
        let temp = self.temp_table(position.index)?;
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        sql.push_str(
            &UpsertStatements {
                target: &self.target,
                temp: &temp,
                columns,
                key_column: &self.key_column,
                url,
                iam_role: &self.iam_role,
            }
            .render(),
        );
        sql.push_str(&ledger.ledger_append_sql(object));
        sql.push('\n');
        if position.advance_cursor {
            sql.push_str(&ledger.advance_sql(object));
            sql.push('\n');
        }
        sql.push_str("END TRANSACTION;");
        Ok(sql)
    }

    /// Stage `table` and commit it as `object`
    #[instrument(skip(self, table, ledger), fields(object_key = %object.object_key, rows = table.len()))]
    pub async fn load_unit(
        &self,
        object: &ObjectCursor,
        table: &Table,
        position: UnitPosition,
        ledger: &LedgerCursorStore,
    ) -> Result<String> {
        let staged = staged_key(&self.staging_prefix, &self.feed_prefix, &object.object_key);
        self.store.put(&staged, table.to_csv()?, "text/csv").await?;

        let url = object_url(self.store.as_ref(), &staged);
        let script = self.unit_script(object, &table.columns, &url, position, ledger)?;
        self.runner.execute(&script).await?;

        info!(staged = %staged, cursor_moved = position.advance_cursor, "Unit committed");
        Ok(staged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use crate::warehouse::{PollPolicy, RecordingWarehouse};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        warehouse: Arc<RecordingWarehouse>,
        ledger: LedgerCursorStore,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryObjectStore::new("staging"));
        let warehouse = Arc::new(RecordingWarehouse::new());
        let runner = StatementRunner::new(warehouse.clone(), PollPolicy::default());
        let ledger = LedgerCursorStore::new(
            runner,
            "event_feed",
            QualifiedName::new("ops", "last_loaded").unwrap(),
            QualifiedName::new("ops", "loaded_objects").unwrap(),
        );
        Fixture {
            store,
            warehouse,
            ledger,
        }
    }

    fn loader(fx: &Fixture, split: bool) -> UpsertLoader {
        UpsertLoader::new(
            fx.store.clone(),
            StatementRunner::new(fx.warehouse.clone(), PollPolicy::default()),
            "events/",
            "feed/",
            "arn:aws:iam::123456789012:role/WarehouseS3",
            QualifiedName::new("raw", "events").unwrap(),
            "event_id",
            split,
        )
    }

    fn object() -> ObjectCursor {
        ObjectCursor::new("feed/2024/05/01/a.gz", Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
            .unwrap()
    }

    fn table() -> Table {
        let mut table = Table::new(vec!["event_id".into(), "page".into()]);
        table.rows.push(vec![Some("e1".into()), Some("/".into())]);
        table
    }

    #[test]
    fn test_temp_table_names() {
        let fx = fixture();
        let shared = loader(&fx, false);
        assert_eq!(shared.temp_table(1).unwrap(), shared.temp_table(2).unwrap());
        assert!(shared.temp_table(1).unwrap().table().starts_with("events_temp_"));

        let split = loader(&fx, true);
        assert_ne!(split.temp_table(1).unwrap(), split.temp_table(2).unwrap());
        assert!(split.temp_table(2).unwrap().table().ends_with("_2"));
    }

    #[tokio::test]
    async fn test_unit_commits_ledger_and_cursor_in_one_script() {
        let fx = fixture();
        let staged = loader(&fx, false)
            .load_unit(
                &object(),
                &table(),
                UnitPosition {
                    index: 1,
                    advance_cursor: true,
                },
                &fx.ledger,
            )
            .await
            .unwrap();

        assert_eq!(staged, "events/2024/05/01/a.csv");
        assert!(fx.store.contains("events/2024/05/01/a.csv"));

        let statements = fx.warehouse.statements();
        assert_eq!(statements.len(), 1);
        let script = &statements[0];
        assert!(script.starts_with("BEGIN TRANSACTION;"));
        assert!(script.ends_with("END TRANSACTION;"));
        assert!(script.contains("COPY raw.events_temp_"));
        assert!(script.contains("(event_id, page)"));
        assert!(script.contains("INSERT INTO ops.loaded_objects"));
        assert!(script.contains("DELETE FROM ops.last_loaded"));
    }

    #[tokio::test]
    async fn test_cursor_row_untouched_when_not_allowed() {
        let fx = fixture();
        loader(&fx, false)
            .load_unit(
                &object(),
                &table(),
                UnitPosition {
                    index: 2,
                    advance_cursor: false,
                },
                &fx.ledger,
            )
            .await
            .unwrap();

        let script = &fx.warehouse.statements()[0];
        assert!(script.contains("INSERT INTO ops.loaded_objects"));
        assert!(!script.contains("ops.last_loaded"));
    }
}
