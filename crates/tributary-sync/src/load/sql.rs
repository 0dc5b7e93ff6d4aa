//! Warehouse statement builders
//!
//! The statement API takes plain SQL text, so every identifier that reaches
//! these builders has been validated and every literal goes through
//! [`quote_literal`].

use chrono::{DateTime, Utc};

use crate::config::validate_identifier;
use crate::error::Result;

/// A validated `schema.table` name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    schema: String,
    table: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        let table = table.into();
        validate_identifier("schema", &schema)?;
        validate_identifier("table", &table)?;
        Ok(Self { schema, table })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Another table in the same schema
    pub fn sibling(&self, table: impl Into<String>) -> Result<Self> {
        Self::new(self.schema.clone(), table)
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// UTC timestamp literal without offset, as the warehouse stores `timestamp` columns
pub fn timestamp_literal(ts: &DateTime<Utc>) -> String {
    quote_literal(&ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
}

/// Bulk load a staged CSV file with a header line
pub fn copy_csv(target: &QualifiedName, columns: Option<&[String]>, url: &str, iam_role: &str) -> String {
    let column_list = columns
        .map(|cols| format!(" ({})", cols.join(", ")))
        .unwrap_or_default();
    format!(
        "COPY {target}{column_list}\nFROM {url}\nIAM_ROLE {role}\nIGNOREHEADER 1\nCSV\nTIMEFORMAT 'auto';",
        url = quote_literal(url),
        role = quote_literal(iam_role),
    )
}

/// Replace the whole contents of `target` with a staged file in one transaction
pub fn replace_table_script(target: &QualifiedName, url: &str, iam_role: &str) -> String {
    let mut sql = String::from("BEGIN TRANSACTION;\n");
    sql.push_str(&format!("DELETE FROM {};\n", target));
    sql.push_str(&copy_csv(target, None, url, iam_role));
    sql.push_str("\nEND TRANSACTION;");
    sql
}

/// Export `source` as one gzip pipe-delimited file with a quoted header
pub fn unload_script(source: &QualifiedName, url_prefix: &str, iam_role: &str) -> String {
    format!(
        "UNLOAD ({query})\nTO {url}\nIAM_ROLE {role}\nPARALLEL OFF\nDELIMITER '|'\nALLOWOVERWRITE\nADDQUOTES\nHEADER\nGZIP;",
        query = quote_literal(&format!("select * from {}", source)),
        url = quote_literal(url_prefix),
        role = quote_literal(iam_role),
    )
}

/// Statements that replace rows of `target` colliding on `key_column` with
/// the rows of a staged file, through a scratch table
pub struct UpsertStatements<'a> {
    pub target: &'a QualifiedName,
    pub temp: &'a QualifiedName,
    pub columns: &'a [String],
    pub key_column: &'a str,
    pub url: &'a str,
    pub iam_role: &'a str,
}

impl UpsertStatements<'_> {
    pub fn render(&self) -> String {
        let (target, temp, key) = (self.target, self.temp, self.key_column);
        let mut sql = String::new();
        sql.push_str(&format!("CREATE TABLE IF NOT EXISTS {temp} (LIKE {target});\n"));
        sql.push_str(&format!("TRUNCATE {temp};\n"));
        sql.push_str(&copy_csv(temp, Some(self.columns), self.url, self.iam_role));
        sql.push('\n');
        sql.push_str(&format!(
            "DELETE FROM {target} USING {temp} WHERE {target}.{key} = {temp}.{key};\n"
        ));
        sql.push_str(&format!("INSERT INTO {target} (SELECT * FROM {temp});\n"));
        sql.push_str(&format!("DROP TABLE {temp};\n"));
        sql
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ROLE: &str = "arn:aws:iam::123456789012:role/WarehouseS3";

    #[test]
    fn test_qualified_name_rejects_injection() {
        assert!(QualifiedName::new("audit", "dbt_runs").is_ok());
        assert!(QualifiedName::new("audit", "runs; drop table x").is_err());
        assert!(QualifiedName::new("", "runs").is_err());
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_timestamp_literal() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap();
        assert_eq!(timestamp_literal(&ts), "'2024-05-01 07:30:00.000000'");
    }

    #[test]
    fn test_replace_script_deletes_then_copies_in_one_transaction() {
        let target = QualifiedName::new("audit", "dbt_runs").unwrap();
        let sql = replace_table_script(&target, "s3://staging/dbt/dbt_runs.csv", ROLE);

        let delete = sql.find("DELETE FROM audit.dbt_runs;").unwrap();
        let copy = sql.find("COPY audit.dbt_runs\nFROM 's3://staging/dbt/dbt_runs.csv'").unwrap();
        assert!(sql.starts_with("BEGIN TRANSACTION;"));
        assert!(sql.ends_with("END TRANSACTION;"));
        assert!(delete < copy);
        assert!(sql.contains("IGNOREHEADER 1"));
    }

    #[test]
    fn test_unload_quotes_inner_query() {
        let source = QualifiedName::new("marts", "user_properties").unwrap();
        let sql = unload_script(&source, "s3://staging/profiles/users_snapshot", ROLE);
        assert!(sql.starts_with("UNLOAD ('select * from marts.user_properties')"));
        assert!(sql.contains("PARALLEL OFF"));
        assert!(sql.contains("DELIMITER '|'"));
        assert!(sql.contains("GZIP;"));
    }

    #[test]
    fn test_upsert_statement_order() {
        let target = QualifiedName::new("raw", "events").unwrap();
        let temp = target.sibling("events_temp_1a2b3c4d").unwrap();
        let columns = vec!["event_id".to_string(), "event_time".to_string()];
        let sql = UpsertStatements {
            target: &target,
            temp: &temp,
            columns: &columns,
            key_column: "event_id",
            url: "s3://staging/events/2024/05/01/a.csv",
            iam_role: ROLE,
        }
        .render();

        let positions: Vec<usize> = [
            "CREATE TABLE IF NOT EXISTS raw.events_temp_1a2b3c4d (LIKE raw.events);",
            "COPY raw.events_temp_1a2b3c4d (event_id, event_time)",
            "DELETE FROM raw.events USING raw.events_temp_1a2b3c4d WHERE raw.events.event_id = raw.events_temp_1a2b3c4d.event_id;",
            "INSERT INTO raw.events (SELECT * FROM raw.events_temp_1a2b3c4d);",
            "DROP TABLE raw.events_temp_1a2b3c4d;",
        ]
        .iter()
        .map(|needle| sql.find(needle).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
