//! Bucket connection settings, read per role (`STAGING_*`, `EVENTS_FEED_*`)

use serde::{Deserialize, Serialize};

use crate::config::{EnvReader, DEFAULT_REGION};
use crate::error::{Result, SyncError};

/// Static access keys; when absent the default AWS provider chain is used
#[derive(Clone, Serialize, Deserialize)]
pub struct StaticCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub credentials: Option<StaticCredentials>,
    pub path_style: bool,
}

impl StorageConfig {
    /// Read `{PREFIX}_BUCKET`, `{PREFIX}_REGION`, `{PREFIX}_ENDPOINT`,
    /// `{PREFIX}_ACCESS_KEY`, `{PREFIX}_SECRET_KEY` and `{PREFIX}_PATH_STYLE`
    pub fn from_reader<F>(env: &EnvReader<F>, prefix: &str) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| format!("{}_{}", prefix, suffix);

        let credentials = match (
            env.optional(&var("ACCESS_KEY")),
            env.optional(&var("SECRET_KEY")),
        ) {
            (Some(access_key), Some(secret_key)) => Some(StaticCredentials {
                access_key,
                secret_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(SyncError::MissingConfig(var("SECRET_KEY"))),
            (None, Some(_)) => return Err(SyncError::MissingConfig(var("ACCESS_KEY"))),
        };

        Ok(Self {
            endpoint: env.optional(&var("ENDPOINT")),
            region: env
                .optional(&var("REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: env.required(&var("BUCKET"))?,
            credentials,
            path_style: env.parse_or(&var("PATH_STYLE"), false)?,
        })
    }

    /// Local S3-compatible server with path-style addressing
    pub fn for_endpoint(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            credentials: None,
            path_style: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reader(vars: &[(&str, &str)]) -> EnvReader<impl Fn(&str) -> Option<String>> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvReader::new(move |name: &str| map.get(name).cloned())
    }

    #[test]
    fn test_prefixed_variables() {
        let config = StorageConfig::from_reader(
            &reader(&[
                ("EVENTS_FEED_BUCKET", "vendor-feed"),
                ("EVENTS_FEED_REGION", "eu-west-1"),
                ("EVENTS_FEED_PATH_STYLE", "true"),
            ]),
            "EVENTS_FEED",
        )
        .unwrap();
        assert_eq!(config.bucket, "vendor-feed");
        assert_eq!(config.region, "eu-west-1");
        assert!(config.path_style);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_half_credentials_rejected() {
        let err = StorageConfig::from_reader(
            &reader(&[("STAGING_BUCKET", "b"), ("STAGING_ACCESS_KEY", "AKIA")]),
            "STAGING",
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::MissingConfig(ref name) if name == "STAGING_SECRET_KEY"));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = StorageConfig {
            credentials: Some(StaticCredentials {
                access_key: "AKIA".into(),
                secret_key: "hunter2".into(),
            }),
            ..StorageConfig::for_endpoint("http://localhost:9000", "staging")
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
