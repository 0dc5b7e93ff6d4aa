//! Profile update payloads
//!
//! Every changed snapshot record becomes one update object:
//!
//! ```json
//! {"$token": "...", "$distinct_id": "42", "$ip": "0", "$set": {"$email": "a@example.com"}}
//! ```
//!
//! `$ip` is always `"0"` so the receiving side keeps the profile's existing
//! location instead of geolocating this job.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashSet};

use crate::cursor::snapshot::Snapshot;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(rename = "$token")]
    pub token: String,
    #[serde(rename = "$distinct_id")]
    pub distinct_id: String,
    #[serde(rename = "$ip")]
    pub ip: String,
    #[serde(rename = "$set")]
    pub set: Map<String, Value>,
}

/// Typed JSON value of a snapshot cell
pub fn typed_value(cell: &str) -> Value {
    match cell {
        "" => Value::Null,
        "t" | "true" => Value::Bool(true),
        "f" | "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = cell.parse::<i64>() {
                return Value::Number(n.into());
            }
            cell.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(cell.to_string()))
        },
    }
}

/// Builds update payloads from snapshot records
pub struct ProfileMapper<'a> {
    pub token: &'a str,
    /// Column excluded from `$set`
    pub fingerprint_column: &'a str,
    /// Column name to property name
    pub rename: &'a BTreeMap<String, String>,
}

impl ProfileMapper<'_> {
    /// One update per record of `snapshot` whose key is in `keys`, in snapshot order
    pub fn updates(&self, snapshot: &Snapshot, keys: &HashSet<String>) -> Result<Vec<ProfileUpdate>> {
        let headers = snapshot.headers();
        snapshot
            .select(keys)
            .map(|record| {
                if record.values.len() != headers.len() {
                    return Err(SyncError::transform(format!(
                        "record {} has {} cells, header has {}",
                        record.key,
                        record.values.len(),
                        headers.len()
                    )));
                }
                let set = headers
                    .iter()
                    .zip(&record.values)
                    .filter(|(column, _)| column.as_str() != self.fingerprint_column)
                    .map(|(column, cell)| {
                        let name = self.rename.get(column).unwrap_or(column);
                        (name.clone(), typed_value(cell))
                    })
                    .collect();
                Ok(ProfileUpdate {
                    token: self.token.to_string(),
                    distinct_id: record.key.clone(),
                    ip: "0".to_string(),
                    set,
                })
            })
            .collect()
    }
}
