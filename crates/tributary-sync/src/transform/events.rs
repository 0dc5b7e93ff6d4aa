//! Event feed objects
//!
//! Each object is a gzip file of newline-delimited JSON events. Only the
//! configured fields are kept, in configured order, under their output
//! names. The event time arrives as an epoch number and leaves as a UTC
//! timestamp.

use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use tracing::debug;

use super::table::Table;
use super::timestamps::{epoch_from_value, format_timestamp, EpochUnit};
use crate::error::{Result, SyncError};

/// Field selection and renaming for one feed
#[derive(Debug, Clone)]
pub struct EventLayout {
    /// Source field names to keep, in output order
    pub keep: Vec<String>,
    /// Source field name to output column name
    pub rename: BTreeMap<String, String>,
    /// Output column that must be present on every event
    pub key_column: String,
    /// Output column holding an epoch timestamp
    pub time_column: String,
    pub time_unit: EpochUnit,
}

impl EventLayout {
    pub fn output_columns(&self) -> Vec<String> {
        self.keep
            .iter()
            .map(|field| self.rename.get(field).cloned().unwrap_or_else(|| field.clone()))
            .collect()
    }
}

/// Decode a gzip NDJSON object into a table shaped by `layout`
pub fn decode_events(bytes: &[u8], layout: &EventLayout) -> Result<Table> {
    let columns = layout.output_columns();
    let key_index = columns
        .iter()
        .position(|c| *c == layout.key_column)
        .ok_or_else(|| {
            SyncError::transform(format!("key column '{}' is not kept", layout.key_column))
        })?;
    let time_index = columns.iter().position(|c| *c == layout.time_column);

    let mut table = Table::new(columns);
    let reader = BufReader::new(GzDecoder::new(bytes));

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Map<String, Value> = serde_json::from_str(&line).map_err(|e| {
            SyncError::transform(format!("line {} is not a JSON object: {}", line_no + 1, e))
        })?;

        let mut row: Vec<Option<String>> = layout
            .keep
            .iter()
            .map(|field| event.get(field).and_then(cell_text))
            .collect();

        if let Some(i) = time_index {
            let field = &layout.keep[i];
            row[i] = event
                .get(field)
                .and_then(|v| epoch_from_value(v, layout.time_unit))
                .map(|ts| format_timestamp(&ts));
        }

        if row[key_index].is_none() {
            return Err(SyncError::transform(format!(
                "line {} has no '{}'",
                line_no + 1,
                layout.key_column
            )));
        }
        table.rows.push(row);
    }

    debug!(rows = table.len(), columns = table.columns.len(), "Decoded event object");
    Ok(table)
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Staging key for a feed object: feed prefix removed, `.gz` swapped for `.csv`
pub fn staged_key(staging_prefix: &str, feed_prefix: &str, object_key: &str) -> String {
    let relative = object_key.strip_prefix(feed_prefix).unwrap_or(object_key);
    let relative = relative.strip_suffix(".gz").unwrap_or(relative);
    format!("{}{}.csv", staging_prefix, relative)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cursor::snapshot::gzip;

    fn layout() -> EventLayout {
        EventLayout {
            keep: vec!["eventid".into(), "eventtime".into(), "page".into()],
            rename: [
                ("eventid".to_string(), "event_id".to_string()),
                ("eventtime".to_string(), "event_time".to_string()),
            ]
            .into(),
            key_column: "event_id".into(),
            time_column: "event_time".into(),
            time_unit: EpochUnit::Millis,
        }
    }

    #[test]
    fn test_keeps_renames_and_converts_time() {
        let body = concat!(
            r#"{"eventid":"e1","eventtime":1714546800000,"page":"/home","ua":"x"}"#,
            "\n\n",
            r#"{"page":"/cart","eventid":"e2","eventtime":"1714546801000"}"#,
            "\n"
        );
        let table = decode_events(&gzip(body.as_bytes()).unwrap(), &layout()).unwrap();

        assert_eq!(table.columns, vec!["event_id", "event_time", "page"]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.rows[0],
            vec![
                Some("e1".to_string()),
                Some("2024-05-01 07:00:00.000000+00:00".to_string()),
                Some("/home".to_string()),
            ]
        );
        assert_eq!(table.rows[1][1].as_deref(), Some("2024-05-01 07:00:01.000000+00:00"));
    }

    #[test]
    fn test_missing_field_becomes_null() {
        let body = r#"{"eventid":"e1","eventtime":1714546800000}"#;
        let table = decode_events(&gzip(body.as_bytes()).unwrap(), &layout()).unwrap();
        assert_eq!(table.rows[0][2], None);
    }

    #[test]
    fn test_malformed_line_is_transform_error() {
        let body = "{\"eventid\":\"e1\"}\nnot json\n";
        let err = decode_events(&gzip(body.as_bytes()).unwrap(), &layout()).unwrap_err();
        assert!(matches!(err, SyncError::Transform(ref m) if m.contains("line 2")));
    }

    #[test]
    fn test_event_without_key_is_rejected() {
        let body = r#"{"eventtime":1714546800000,"page":"/"}"#;
        let err = decode_events(&gzip(body.as_bytes()).unwrap(), &layout()).unwrap_err();
        assert!(matches!(err, SyncError::Transform(_)));
    }

    #[test]
    fn test_staged_key() {
        assert_eq!(
            staged_key("events/", "tealium/feed/", "tealium/feed/2024/05/01/a.gz"),
            "events/2024/05/01/a.csv"
        );
        assert_eq!(staged_key("", "other/", "feed/a.json"), "feed/a.json.csv");
    }
}
