//! End-to-end tests for the event feed job
//!
//! These tests validate:
//! - New objects are upserted one transaction each, in key order
//! - An unreadable object is skipped and pins the cursor row
//! - Ledger entries keep already-loaded objects out of the delta
//! - Empty listings and missing cursors
//! - A failed statement stops the run

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{at, base_vars, env, gzip, warehouse, FlakyStore};
use std::sync::Arc;
use tributary_sync::config::{EventsConfig, SyncConfig};
use tributary_sync::jobs::EventsSync;
use tributary_sync::storage::MemoryObjectStore;
use tributary_sync::warehouse::{Cell, RecordingWarehouse, StatementRunner};
use tributary_sync::{ErrorKind, SyncError};

const CURSOR_QUERY: &str = "FROM ops.last_loaded WHERE source";
const LEDGER_KEYS_QUERY: &str = "SELECT object_key FROM ops.loaded_objects";

fn configs(extra: &[(&'static str, &'static str)]) -> (SyncConfig, EventsConfig) {
    let mut vars = base_vars("events/");
    vars.extend([
        ("EVENTS_FEED_BUCKET", "vendor-feed"),
        ("EVENTS_FEED_PREFIX", "feed"),
        ("EVENTS_TARGET_TABLE", "events"),
        ("EVENTS_LEDGER_SCHEMA", "ops"),
        ("EVENTS_LEDGER_TABLE", "loaded_objects"),
        ("EVENTS_KEEP_COLUMNS", "eventid, eventtime, page"),
        (
            "EVENTS_RENAME",
            r#"{"eventid": "event_id", "eventtime": "event_time"}"#,
        ),
    ]);
    vars.extend_from_slice(extra);
    let reader = env(&vars);
    (
        SyncConfig::from_reader(&reader).unwrap(),
        EventsConfig::from_reader(&reader).unwrap(),
    )
}

fn event_object(ids: &[&str]) -> Vec<u8> {
    let lines: Vec<String> = ids
        .iter()
        .map(|id| format!(r#"{{"eventid": "{id}", "eventtime": 1714546800000, "page": "/home", "ua": "x"}}"#))
        .collect();
    gzip(&lines.join("\n"))
}

fn feed(keys: &[&str]) -> MemoryObjectStore {
    let store = MemoryObjectStore::new("vendor-feed");
    for (i, key) in keys.iter().enumerate() {
        store.insert(key, event_object(&[format!("e{i}").as_str()]), at(8, i as u32));
    }
    store
}

fn with_cursor(warehouse: &RecordingWarehouse, key: &str) {
    warehouse.respond_when(
        CURSOR_QUERY,
        vec![vec![
            Cell::Text(key.to_string()),
            Cell::Text("2024-05-01 08:00:00".to_string()),
        ]],
    );
}

fn job(
    feed: Arc<dyn tributary_sync::storage::ObjectStore>,
    staging: Arc<MemoryObjectStore>,
    runner: StatementRunner,
    extra: &[(&'static str, &'static str)],
) -> EventsSync {
    let (sync, events) = configs(extra);
    EventsSync::new(feed, staging, runner, &events, &sync).unwrap()
}

fn unit_scripts(warehouse: &RecordingWarehouse) -> Vec<String> {
    warehouse.statements_matching("BEGIN TRANSACTION;")
}

#[tokio::test]
async fn test_new_objects_are_upserted_in_key_order() {
    let (warehouse, runner) = warehouse();
    with_cursor(&warehouse, "feed/2024/05/01/0800.gz");
    let feed = Arc::new(feed(&[
        "feed/2024/05/01/0800.gz",
        "feed/2024/05/01/0815.gz",
        "feed/2024/05/01/0830.gz",
    ]));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let report = job(feed, staging.clone(), runner, &[]).run().await.unwrap();

    assert_eq!(report.units_detected, 2);
    assert_eq!(report.units_loaded, 2);
    assert_eq!(report.rows, 2);
    assert!(report.cursor_advanced);

    let scripts = unit_scripts(&warehouse);
    assert_eq!(scripts.len(), 2);
    assert!(scripts[0].contains("'feed/2024/05/01/0815.gz'"));
    assert!(scripts[1].contains("'feed/2024/05/01/0830.gz'"));
    for script in &scripts {
        assert!(script.contains("COPY analytics.events_temp_"));
        assert!(script.contains("(event_id, event_time, page)"));
        assert!(script.contains("DELETE FROM analytics.events USING"));
        assert!(script.contains("INSERT INTO ops.loaded_objects"));
        assert!(script.contains("INSERT INTO ops.last_loaded"));
        assert!(script.ends_with("END TRANSACTION;"));
    }

    let staged = String::from_utf8(staging.body("events/2024/05/01/0815.csv").unwrap()).unwrap();
    assert_eq!(
        staged,
        "event_id,event_time,page\ne1,2024-05-01 07:00:00.000000+00:00,/home\n"
    );
}

#[tokio::test]
async fn test_skipped_object_pins_cursor_row() {
    let (warehouse, runner) = warehouse();
    with_cursor(&warehouse, "feed/2024/05/01/0800.gz");
    let feed = Arc::new(FlakyStore::new(
        feed(&[
            "feed/2024/05/01/0815.gz",
            "feed/2024/05/01/0830.gz",
            "feed/2024/05/01/0845.gz",
        ]),
        &["feed/2024/05/01/0830.gz"],
    ));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let report = job(feed, staging, runner, &[]).run().await.unwrap();

    assert_eq!(report.units_loaded, 2);
    assert_eq!(report.units_skipped, 1);

    let scripts = unit_scripts(&warehouse);
    assert_eq!(scripts.len(), 2);
    // before the skip: ledger and cursor row
    assert!(scripts[0].contains("0815.gz"));
    assert!(scripts[0].contains("INSERT INTO ops.last_loaded"));
    // after the skip: ledger only
    assert!(scripts[1].contains("0845.gz"));
    assert!(scripts[1].contains("INSERT INTO ops.loaded_objects"));
    assert!(!scripts[1].contains("ops.last_loaded"));
    assert!(warehouse.statements().iter().all(|sql| !sql.contains("'feed/2024/05/01/0830.gz'")));
}

#[tokio::test]
async fn test_ledger_entries_are_not_reloaded() {
    let (warehouse, runner) = warehouse();
    with_cursor(&warehouse, "feed/2024/05/01/0815.gz");
    warehouse.respond_when(
        LEDGER_KEYS_QUERY,
        vec![vec![Cell::Text("feed/2024/05/01/0845.gz".into())]],
    );
    let feed = Arc::new(feed(&[
        "feed/2024/05/01/0830.gz",
        "feed/2024/05/01/0845.gz",
        "feed/2024/05/01/0900.gz",
    ]));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let report = job(feed, staging, runner, &[]).run().await.unwrap();

    assert_eq!(report.units_detected, 2);
    let scripts = unit_scripts(&warehouse);
    assert!(scripts[0].contains("0830.gz"));
    assert!(scripts[1].contains("0900.gz"));
}

#[tokio::test]
async fn test_empty_listing_touches_nothing() {
    let (warehouse, runner) = warehouse();
    with_cursor(&warehouse, "feed/2024/05/01/0830.gz");
    let feed = Arc::new(feed(&["feed/2024/05/01/0815.gz", "feed/2024/05/01/0830.gz"]));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let report = job(feed, staging.clone(), runner, &[]).run().await.unwrap();

    assert!(report.is_noop());
    assert!(!report.cursor_advanced);
    assert!(unit_scripts(&warehouse).is_empty());
    assert!(staging.keys().is_empty());
}

#[tokio::test]
async fn test_empty_listing_can_be_an_error() {
    let (warehouse, runner) = warehouse();
    with_cursor(&warehouse, "feed/2024/05/01/0830.gz");
    let feed = Arc::new(feed(&["feed/2024/05/01/0830.gz"]));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let err = job(feed, staging, runner, &[("EVENTS_EMPTY_POLICY", "fail")])
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::EmptyDelta(_)));
    assert!(unit_scripts(&warehouse).is_empty());
}

#[tokio::test]
async fn test_missing_cursor_needs_start_after() {
    let feed_keys = ["feed/2024/05/01/0815.gz", "feed/2024/05/01/0830.gz"];

    let (warehouse, runner) = warehouse();
    let staging = Arc::new(MemoryObjectStore::new("staging"));
    let err = job(Arc::new(feed(&feed_keys)), staging, runner, &[])
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::CursorNotFound(_)));
    assert!(unit_scripts(&warehouse).is_empty());

    let (warehouse, runner) = common::warehouse();
    let staging = Arc::new(MemoryObjectStore::new("staging"));
    let report = job(
        Arc::new(feed(&feed_keys)),
        staging,
        runner,
        &[("EVENTS_START_AFTER", "feed/2024/05/01/0815.gz")],
    )
    .run()
    .await
    .unwrap();
    assert_eq!(report.units_loaded, 1);
    assert!(unit_scripts(&warehouse)[0].contains("0830.gz"));
}

#[tokio::test]
async fn test_failed_statement_stops_the_run() {
    let (warehouse, runner) = warehouse();
    with_cursor(&warehouse, "feed/2024/05/01/0800.gz");
    warehouse.fail_when("'feed/2024/05/01/0815.gz'", "S3ServiceException: Access Denied");
    let feed = Arc::new(feed(&["feed/2024/05/01/0815.gz", "feed/2024/05/01/0830.gz"]));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let err = job(feed, staging, runner, &[]).run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Load);
    // the second object is never attempted
    assert_eq!(unit_scripts(&warehouse).len(), 1);
}

#[tokio::test]
async fn test_malformed_object_is_fatal() {
    let (warehouse, runner) = warehouse();
    with_cursor(&warehouse, "feed/2024/05/01/0800.gz");
    let store = MemoryObjectStore::new("vendor-feed");
    store.insert("feed/2024/05/01/0815.gz", gzip("{not json"), at(8, 15));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let err = job(Arc::new(store), staging, runner, &[]).run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transform);
    assert!(unit_scripts(&warehouse).is_empty());
}
