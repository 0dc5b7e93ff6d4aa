//! Profile batch-update API client

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{PushResponse, PushTarget};
use crate::config::ProfilesConfig;
use crate::error::{Result, SyncError};
use crate::transform::profiles::ProfileUpdate;

/// Body returned when `verbose=1` is requested
#[derive(Debug, Deserialize)]
struct VerboseBody {
    status: i64,
    error: Option<String>,
}

pub struct ProfileApiClient {
    client: Client,
    url: String,
}

impl ProfileApiClient {
    pub fn new(config: &ProfilesConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            url: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl PushTarget<ProfileUpdate> for ProfileApiClient {
    async fn send(&self, batch: &[ProfileUpdate]) -> Result<PushResponse> {
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, "text/plain")
            .header(CONTENT_TYPE, "application/json")
            .json(batch)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, body = %body, "Profile batch response");
        Ok(PushResponse { status, body })
    }

    /// A 200 can still carry `{"status": 0, "error": ...}` (verbose) or a bare `0`
    fn check_accepted(&self, response: &PushResponse) -> Result<()> {
        let body = response.body.trim();
        if body == "0" {
            return Err(SyncError::PushRejected {
                status: response.status,
                message: "update rejected".to_string(),
            });
        }
        match serde_json::from_str::<VerboseBody>(body) {
            Ok(verbose) if verbose.status == 0 => Err(SyncError::PushRejected {
                status: response.status,
                message: verbose.error.unwrap_or_else(|| "update rejected".to_string()),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fetch::retry::BackoffPolicy;
    use crate::push::BatchSender;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> ProfilesConfig {
        ProfilesConfig {
            token: "project-token".into(),
            api_url: url,
            batch_size: 2,
            source_schema: "marts".into(),
            source_table: "user_properties".into(),
            identifier: "user_properties".into(),
            key_column: "user_id".into(),
            fingerprint_column: "key".into(),
            update_all: false,
            bootstrap_empty: false,
            rename: BTreeMap::new(),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn update(id: &str) -> ProfileUpdate {
        let mut set = Map::new();
        set.insert("$email".into(), json!(format!("{id}@example.com")));
        ProfileUpdate {
            token: "project-token".into(),
            distinct_id: id.into(),
            ip: "0".into(),
            set,
        }
    }

    #[tokio::test]
    async fn test_posts_json_array() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/engage"))
            .and(header("accept", "text/plain"))
            .and(body_partial_json(json!([{"$distinct_id": "1", "$ip": "0"}])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": null, "status": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProfileApiClient::new(&config(format!("{}/engage?verbose=1", server.uri()))).unwrap();
        let report = BatchSender::new(BackoffPolicy::immediate(3), 2)
            .send_all(&client, &[update("1"), update("2")])
            .await
            .unwrap();

        assert_eq!(report.batches, 1);
    }

    #[tokio::test]
    async fn test_verbose_error_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": "$token is invalid", "status": 0})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ProfileApiClient::new(&config(format!("{}/engage?verbose=1", server.uri()))).unwrap();
        let err = BatchSender::new(BackoffPolicy::immediate(3), 2)
            .send_all(&client, &[update("1")])
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::PushRejected { ref message, .. } if message == "$token is invalid"));
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1"))
            .mount(&server)
            .await;

        let client = ProfileApiClient::new(&config(format!("{}/engage", server.uri()))).unwrap();
        let report = BatchSender::new(BackoffPolicy::immediate(6), 2)
            .send_all(&client, &[update("1"), update("2"), update("3")])
            .await
            .unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!(report.retries, 2);
    }
}
