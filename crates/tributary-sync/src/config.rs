//! Job configuration
//!
//! Configuration is read once at startup into immutable values that are
//! handed to each component at construction. Every section lists the
//! variables it needs and fails fast on the first one that is missing or
//! malformed.
//!
//! Common variables:
//!
//! - `WAREHOUSE_DATABASE`, `WAREHOUSE_IAM_ROLE` (required)
//! - `WAREHOUSE_CLUSTER_ID` or `WAREHOUSE_WORKGROUP` (one required)
//! - `WAREHOUSE_DB_USER`, `WAREHOUSE_SECRET_ARN`, `WAREHOUSE_REGION`
//! - `WAREHOUSE_POLL_INTERVAL_MS`, `WAREHOUSE_MAX_WAIT_SECS`
//! - `STAGING_BUCKET` (required), `STAGING_PREFIX`, `STAGING_REGION`, ...
//! - `TARGET_SCHEMA` (required), `LOCAL_UTC_OFFSET`
//! - `RETRY_MAX_ATTEMPTS`, `RETRY_CAP_SECS`, `RETRY_JITTER_MIN_SECS`, `RETRY_JITTER_MAX_SECS`
//!
//! Job sections: `DBT_*`, `PROFILES_*`, `EVENTS_*`.

use chrono::FixedOffset;
use regex::Regex;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::detect::EmptyDeltaPolicy;
use crate::error::{Result, SyncError};
use crate::fetch::retry::BackoffPolicy;
use crate::storage::config::StorageConfig;
use crate::transform::events::EventLayout;
use crate::transform::timestamps::{parse_utc_offset, EpochUnit, DEFAULT_LOCAL_OFFSET};
use crate::warehouse::PollPolicy;

/// Default AWS region when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default warehouse poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default upper bound on how long one statement may run
pub const DEFAULT_MAX_WAIT_SECS: u64 = 900;

pub const DEFAULT_DBT_API_BASE_URL: &str = "https://cloud.getdbt.com";
pub const DEFAULT_DBT_METADATA_URL: &str = "https://metadata.cloud.getdbt.com/graphql";

/// How many recent runs to inspect when looking for the newest scheduled run
pub const DEFAULT_RUN_LIST_LIMIT: u32 = 10;

pub const DEFAULT_PROFILES_API_URL: &str = "https://api.mixpanel.com/engage?verbose=1";

/// Largest number of profile updates the push API accepts per request
pub const MAX_PROFILE_BATCH_SIZE: usize = 2000;

// ============================================================================
// Variable lookup
// ============================================================================

/// Typed access to a variable source (process env in production, a map in tests)
pub struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Value of `name` if set and not blank
    pub fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| SyncError::MissingConfig(name.to_string()))
    }

    pub fn parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => raw
                .parse()
                .map_err(|e| SyncError::invalid_config(name, format!("'{}': {}", raw, e))),
            None => Ok(default),
        }
    }

    pub fn parse_required<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(name)?;
        raw.parse()
            .map_err(|e| SyncError::invalid_config(name, format!("'{}': {}", raw, e)))
    }

    /// Comma-separated list
    pub fn list(&self, name: &str) -> Vec<String> {
        self.optional(name)
            .map(|raw| {
                raw.split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// JSON object of string to string, e.g. `{"user_id": "Internal User ID"}`
    pub fn mapping(&self, name: &str) -> Result<BTreeMap<String, String>> {
        match self.optional(name) {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| SyncError::invalid_config(name, format!("expected a JSON object: {}", e))),
            None => Ok(BTreeMap::new()),
        }
    }
}

/// Reader over the process environment, after loading `.env` if present
pub fn process_env() -> EnvReader<fn(&str) -> Option<String>> {
    dotenvy::dotenv().ok();
    EnvReader::new(|name| std::env::var(name).ok())
}

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str, value: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$")
        .map_err(|e| SyncError::invalid_config(name, format!("identifier pattern: {}", e)))?;
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(SyncError::invalid_config(
            name,
            format!("'{}' is not a valid identifier", value),
        ))
    }
}

/// Normalise a key prefix so it is either empty or ends with `/`
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

// ============================================================================
// Common configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub region: String,
    pub database: String,
    pub cluster_identifier: Option<String>,
    pub workgroup_name: Option<String>,
    pub db_user: Option<String>,
    pub secret_arn: Option<String>,
    /// Role the warehouse assumes to read and write the staging bucket
    pub iam_role: String,
    pub poll: PollPolicy,
}

impl WarehouseConfig {
    pub fn from_reader<F>(env: &EnvReader<F>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            region: env
                .optional("WAREHOUSE_REGION")
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            database: env.required("WAREHOUSE_DATABASE")?,
            cluster_identifier: env.optional("WAREHOUSE_CLUSTER_ID"),
            workgroup_name: env.optional("WAREHOUSE_WORKGROUP"),
            db_user: env.optional("WAREHOUSE_DB_USER"),
            secret_arn: env.optional("WAREHOUSE_SECRET_ARN"),
            iam_role: env.required("WAREHOUSE_IAM_ROLE")?,
            poll: PollPolicy {
                interval: Duration::from_millis(
                    env.parse_or("WAREHOUSE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
                ),
                max_wait: Duration::from_secs(
                    env.parse_or("WAREHOUSE_MAX_WAIT_SECS", DEFAULT_MAX_WAIT_SECS)?,
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.cluster_identifier, &self.workgroup_name) {
            (None, None) => {
                return Err(SyncError::MissingConfig(
                    "WAREHOUSE_CLUSTER_ID or WAREHOUSE_WORKGROUP".to_string(),
                ))
            },
            (Some(_), Some(_)) => {
                return Err(SyncError::invalid_config(
                    "WAREHOUSE_WORKGROUP",
                    "set either a cluster or a workgroup, not both",
                ))
            },
            _ => {},
        }
        if self.cluster_identifier.is_some() && self.db_user.is_none() && self.secret_arn.is_none() {
            return Err(SyncError::MissingConfig(
                "WAREHOUSE_DB_USER or WAREHOUSE_SECRET_ARN".to_string(),
            ));
        }
        if self.poll.interval.is_zero() {
            return Err(SyncError::invalid_config(
                "WAREHOUSE_POLL_INTERVAL_MS",
                "must be greater than 0",
            ));
        }
        if self.poll.max_wait < self.poll.interval {
            return Err(SyncError::invalid_config(
                "WAREHOUSE_MAX_WAIT_SECS",
                "must be at least one poll interval",
            ));
        }
        Ok(())
    }
}

/// Settings shared by every job
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub warehouse: WarehouseConfig,
    pub staging: StorageConfig,
    /// Key prefix under which staged files and markers are written
    pub staging_prefix: String,
    pub target_schema: String,
    pub local_offset: FixedOffset,
    pub retry: BackoffPolicy,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_reader(&process_env())
    }

    pub fn from_reader<F>(env: &EnvReader<F>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let offset_raw = env
            .optional("LOCAL_UTC_OFFSET")
            .unwrap_or_else(|| DEFAULT_LOCAL_OFFSET.to_string());
        let local_offset = parse_utc_offset(&offset_raw).ok_or_else(|| {
            SyncError::invalid_config("LOCAL_UTC_OFFSET", format!("'{}' is not +HH:MM", offset_raw))
        })?;

        let defaults = BackoffPolicy::default();
        let retry = BackoffPolicy {
            max_attempts: env.parse_or("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            cap_secs: env.parse_or("RETRY_CAP_SECS", defaults.cap_secs)?,
            jitter_min_secs: env.parse_or("RETRY_JITTER_MIN_SECS", defaults.jitter_min_secs)?,
            jitter_max_secs: env.parse_or("RETRY_JITTER_MAX_SECS", defaults.jitter_max_secs)?,
        };

        let config = Self {
            warehouse: WarehouseConfig::from_reader(env)?,
            staging: StorageConfig::from_reader(env, "STAGING")?,
            staging_prefix: normalize_prefix(&env.optional("STAGING_PREFIX").unwrap_or_default()),
            target_schema: env.required("TARGET_SCHEMA")?,
            local_offset,
            retry,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier("TARGET_SCHEMA", &self.target_schema)?;
        self.retry
            .validate()
            .map_err(|reason| SyncError::invalid_config("RETRY_*", reason))?;
        Ok(())
    }
}

// ============================================================================
// Job sections
// ============================================================================

#[derive(Debug, Clone)]
pub struct DbtConfig {
    pub account_id: i64,
    pub api_token: String,
    pub api_base_url: String,
    pub metadata_url: String,
    pub production_job_id: i64,
    pub test_job_id: i64,
    pub run_list_limit: u32,
    pub scheduled_only: bool,
    pub request_timeout: Duration,
}

impl DbtConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_reader(&process_env())
    }

    pub fn from_reader<F>(env: &EnvReader<F>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            account_id: env.parse_required("DBT_ACCOUNT_ID")?,
            api_token: env.required("DBT_API_TOKEN")?,
            api_base_url: env
                .optional("DBT_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_DBT_API_BASE_URL.to_string()),
            metadata_url: env
                .optional("DBT_METADATA_URL")
                .unwrap_or_else(|| DEFAULT_DBT_METADATA_URL.to_string()),
            production_job_id: env.parse_required("DBT_PRODUCTION_JOB_ID")?,
            test_job_id: env.parse_required("DBT_TEST_JOB_ID")?,
            run_list_limit: env.parse_or("DBT_RUN_LIST_LIMIT", DEFAULT_RUN_LIST_LIMIT)?,
            scheduled_only: env.parse_or("DBT_SCHEDULED_ONLY", true)?,
            request_timeout: Duration::from_secs(env.parse_or("DBT_REQUEST_TIMEOUT_SECS", 60u64)?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_list_limit == 0 {
            return Err(SyncError::invalid_config(
                "DBT_RUN_LIST_LIMIT",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ProfilesConfig {
    pub token: String,
    pub api_url: String,
    pub batch_size: usize,
    pub source_schema: String,
    pub source_table: String,
    /// Base name of the snapshot and reference objects in the staging bucket
    pub identifier: String,
    pub key_column: String,
    pub fingerprint_column: String,
    pub update_all: bool,
    /// Start from an empty reference when none exists instead of failing
    pub bootstrap_empty: bool,
    /// Column name to outbound property name
    pub rename: BTreeMap<String, String>,
    pub request_timeout: Duration,
}

impl ProfilesConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_reader(&process_env())
    }

    pub fn from_reader<F>(env: &EnvReader<F>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            token: env.required("PROFILES_TOKEN")?,
            api_url: env
                .optional("PROFILES_API_URL")
                .unwrap_or_else(|| DEFAULT_PROFILES_API_URL.to_string()),
            batch_size: env.parse_or("PROFILES_BATCH_SIZE", MAX_PROFILE_BATCH_SIZE)?,
            source_schema: env.required("PROFILES_SOURCE_SCHEMA")?,
            source_table: env.required("PROFILES_SOURCE_TABLE")?,
            identifier: env
                .optional("PROFILES_IDENTIFIER")
                .unwrap_or_else(|| "user_properties".to_string()),
            key_column: env
                .optional("PROFILES_KEY_COLUMN")
                .unwrap_or_else(|| "user_id".to_string()),
            fingerprint_column: env
                .optional("PROFILES_FINGERPRINT_COLUMN")
                .unwrap_or_else(|| "key".to_string()),
            update_all: env.parse_or("PROFILES_UPDATE_ALL", false)?,
            bootstrap_empty: env.parse_or("PROFILES_BOOTSTRAP_EMPTY", false)?,
            rename: env.mapping("PROFILES_RENAME")?,
            request_timeout: Duration::from_secs(
                env.parse_or("PROFILES_REQUEST_TIMEOUT_SECS", 60u64)?,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_PROFILE_BATCH_SIZE {
            return Err(SyncError::invalid_config(
                "PROFILES_BATCH_SIZE",
                format!("must be between 1 and {}", MAX_PROFILE_BATCH_SIZE),
            ));
        }
        validate_identifier("PROFILES_SOURCE_SCHEMA", &self.source_schema)?;
        validate_identifier("PROFILES_SOURCE_TABLE", &self.source_table)?;
        if self.identifier.contains('/') {
            return Err(SyncError::invalid_config(
                "PROFILES_IDENTIFIER",
                "must not contain '/'",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub feed: StorageConfig,
    pub feed_prefix: String,
    pub target_table: String,
    pub ledger_schema: String,
    pub ledger_table: String,
    pub cursor_table: String,
    /// Row key of this feed in the cursor table
    pub source_name: String,
    /// Source fields to keep, in output order
    pub keep_columns: Vec<String>,
    /// Source field to output column
    pub rename: BTreeMap<String, String>,
    /// Output column used to replace previously loaded rows
    pub key_column: String,
    /// Output column holding the event epoch
    pub time_column: String,
    pub time_unit: EpochUnit,
    /// Cursor key used when no cursor has ever been stored
    pub start_after: Option<String>,
    pub empty_policy: EmptyDeltaPolicy,
    pub split_temp_tables: bool,
}

impl EventsConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_reader(&process_env())
    }

    pub fn from_reader<F>(env: &EnvReader<F>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            feed: StorageConfig::from_reader(env, "EVENTS_FEED")?,
            feed_prefix: normalize_prefix(&env.optional("EVENTS_FEED_PREFIX").unwrap_or_default()),
            target_table: env.required("EVENTS_TARGET_TABLE")?,
            ledger_schema: env.required("EVENTS_LEDGER_SCHEMA")?,
            ledger_table: env.required("EVENTS_LEDGER_TABLE")?,
            cursor_table: env
                .optional("EVENTS_CURSOR_TABLE")
                .unwrap_or_else(|| "last_loaded".to_string()),
            source_name: env
                .optional("EVENTS_SOURCE_NAME")
                .unwrap_or_else(|| "event_feed".to_string()),
            keep_columns: env.list("EVENTS_KEEP_COLUMNS"),
            rename: env.mapping("EVENTS_RENAME")?,
            key_column: env
                .optional("EVENTS_KEY_COLUMN")
                .unwrap_or_else(|| "event_id".to_string()),
            time_column: env
                .optional("EVENTS_TIME_COLUMN")
                .unwrap_or_else(|| "event_time".to_string()),
            time_unit: env.parse_or("EVENTS_TIME_UNIT", EpochUnit::Millis)?,
            start_after: env.optional("EVENTS_START_AFTER"),
            empty_policy: env.parse_or("EVENTS_EMPTY_POLICY", EmptyDeltaPolicy::Succeed)?,
            split_temp_tables: env.parse_or("EVENTS_SPLIT_TEMP_TABLES", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn layout(&self) -> EventLayout {
        EventLayout {
            keep: self.keep_columns.clone(),
            rename: self.rename.clone(),
            key_column: self.key_column.clone(),
            time_column: self.time_column.clone(),
            time_unit: self.time_unit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.keep_columns.is_empty() {
            return Err(SyncError::MissingConfig("EVENTS_KEEP_COLUMNS".to_string()));
        }
        validate_identifier("EVENTS_TARGET_TABLE", &self.target_table)?;
        validate_identifier("EVENTS_LEDGER_SCHEMA", &self.ledger_schema)?;
        validate_identifier("EVENTS_LEDGER_TABLE", &self.ledger_table)?;
        validate_identifier("EVENTS_CURSOR_TABLE", &self.cursor_table)?;
        let outputs = self.layout().output_columns();
        for column in &outputs {
            validate_identifier("EVENTS_KEEP_COLUMNS", column)?;
        }
        if !outputs.contains(&self.key_column) {
            return Err(SyncError::invalid_config(
                "EVENTS_KEY_COLUMN",
                format!("'{}' is not among the output columns", self.key_column),
            ));
        }
        Ok(())
    }
}
