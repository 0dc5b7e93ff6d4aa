//! Data-test classification
//!
//! Generic dbt tests are named `<kind>_<table>_<column>[__<args>]`. The kind
//! prefix gives the category and, once the prefix and the column segment are
//! stripped, what remains is the table under test. Anything without a known
//! prefix is a custom test and keeps its full name.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestType {
    Unique,
    NotNull,
    AcceptedValues,
    Relationships,
    Custom,
}

impl TestType {
    /// Name prefixes in match order. `Custom` has none.
    const PREFIXES: [(&'static str, TestType); 4] = [
        ("relationships_", TestType::Relationships),
        ("not_null_", TestType::NotNull),
        ("unique_", TestType::Unique),
        ("accepted_values_", TestType::AcceptedValues),
    ];

    /// Label stored in the warehouse
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Unique => "Unique",
            TestType::NotNull => "Not Null",
            TestType::AcceptedValues => "Accepted Values",
            TestType::Relationships => "Relationships",
            TestType::Custom => "Custom",
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category and recovered table name for one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub test_type: TestType,
    pub table_name: String,
}

/// Classify a test by name prefix and recover the table it checks
pub fn classify_test(name: &str, column_name: Option<&str>) -> Classification {
    let (test_type, remainder) = TestType::PREFIXES
        .iter()
        .find_map(|(prefix, kind)| name.strip_prefix(*prefix).map(|rest| (*kind, rest)))
        .unwrap_or((TestType::Custom, name));

    let table_name = match column_name.filter(|c| !c.is_empty()) {
        Some(column) => strip_column_segment(remainder, column),
        None => remainder.to_string(),
    };

    Classification {
        test_type,
        table_name,
    }
}

/// Remove `_<column>` and everything after it, when followed by `__` or the end
fn strip_column_segment(remainder: &str, column: &str) -> String {
    let pattern = format!(r"_{}(__.*|\z)", regex::escape(column));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(remainder, "").into_owned(),
        Err(_) => remainder.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unique() {
        let c = classify_test("unique_orders_id", Some("id"));
        assert_eq!(c.test_type, TestType::Unique);
        assert_eq!(c.table_name, "orders");
    }

    #[test]
    fn test_relationships() {
        let c = classify_test("relationships_users_account_id", Some("account_id"));
        assert_eq!(c.test_type, TestType::Relationships);
        assert_eq!(c.table_name, "users");
    }

    #[test]
    fn test_custom_keeps_full_name() {
        let c = classify_test("custom_check", None);
        assert_eq!(c.test_type, TestType::Custom);
        assert_eq!(c.table_name, "custom_check");

        let with_column = classify_test("custom_check", Some("id"));
        assert_eq!(with_column.table_name, "custom_check");
    }

    #[test]
    fn test_accepted_values_strips_arguments() {
        let c = classify_test(
            "accepted_values_orders_status__placed__shipped__returned",
            Some("status"),
        );
        assert_eq!(c.test_type, TestType::AcceptedValues);
        assert_eq!(c.table_name, "orders");
    }

    #[test]
    fn test_not_null_with_underscored_table() {
        let c = classify_test("not_null_stg_payments_payment_id", Some("payment_id"));
        assert_eq!(c.test_type, TestType::NotNull);
        assert_eq!(c.table_name, "stg_payments");
        assert_eq!(c.test_type.to_string(), "Not Null");
    }

    #[test]
    fn test_column_only_stripped_at_segment_boundary() {
        // "id" also appears inside "idempotent_keys" but is not followed by "__" or the end
        let c = classify_test("unique_idempotent_keys_id", Some("id"));
        assert_eq!(c.table_name, "idempotent_keys");
    }

    #[test]
    fn test_column_with_regex_metacharacters() {
        let c = classify_test("not_null_events_amount.usd", Some("amount.usd"));
        assert_eq!(c.table_name, "events");
    }
}
