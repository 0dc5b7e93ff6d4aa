//! dbt Cloud clients
//!
//! Runs come from the administrative REST API, model and test results from
//! the metadata GraphQL API. Both authenticate with the same bearer token.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use super::retry::{send_with_retry, BackoffPolicy};
use crate::config::DbtConfig;
use crate::detect::runs::{RunDescriptor, RunQuery, RunSource};
use crate::error::{Result, SyncError};
use crate::transform::timestamps::{parse_optional, parse_timestamp};

// ============================================================================
// Endpoints
// ============================================================================

pub fn runs_url(base_url: &str, account_id: i64) -> String {
    format!("{}/api/v2/accounts/{}/runs/", base_url.trim_end_matches('/'), account_id)
}

pub fn run_url(base_url: &str, account_id: i64, run_id: i64) -> String {
    format!("{}{}/", runs_url(base_url, account_id), run_id)
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    status: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    user_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrigger {
    cause: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRun {
    id: i64,
    job_definition_id: i64,
    created_at: String,
    started_at: Option<String>,
    href: Option<String>,
    trigger: Option<ApiTrigger>,
}

impl TryFrom<ApiRun> for RunDescriptor {
    type Error = SyncError;

    fn try_from(run: ApiRun) -> Result<Self> {
        let created_at = parse_timestamp(&run.created_at).ok_or_else(|| {
            SyncError::Detection(format!(
                "run {} has invalid created_at '{}'",
                run.id, run.created_at
            ))
        })?;
        Ok(RunDescriptor {
            id: run.id,
            job_definition_id: run.job_definition_id,
            created_at,
            started_at: parse_optional(run.started_at.as_deref()),
            href: run.href,
            trigger_cause: run.trigger.and_then(|t| t.cause),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct DbtCloudClient {
    client: Client,
    api_base_url: String,
    metadata_url: String,
    account_id: i64,
    token: String,
    retry: BackoffPolicy,
}

impl DbtCloudClient {
    pub fn new(config: &DbtConfig, retry: BackoffPolicy) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            metadata_url: config.metadata_url.clone(),
            account_id: config.account_id,
            token: config.api_token.clone(),
            retry,
        })
    }

    /// Fail on any non-200 with the body's `status.user_message`
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.as_u16() == 200 {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.status.user_message)
            .unwrap_or(body);
        error!(status = status.as_u16(), message = %message, "dbt Cloud API call failed");
        Err(SyncError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Run a metadata query and return its `data` object
    #[instrument(skip(self, query))]
    pub async fn query_metadata<T: DeserializeOwned>(&self, query: &str) -> Result<T> {
        let body = json!({ "query": query });
        let response = send_with_retry(&self.retry, "dbt metadata query", || {
            self.client
                .post(&self.metadata_url)
                .bearer_auth(&self.token)
                .json(&body)
        })
        .await?;
        let response = Self::check(response).await?;

        let payload: GraphQlResponse<T> = response.json().await?;
        if !payload.errors.is_empty() {
            let messages: Vec<String> = payload.errors.into_iter().map(|e| e.message).collect();
            return Err(SyncError::transform(format!(
                "metadata query returned errors: {}",
                messages.join("; ")
            )));
        }
        payload
            .data
            .ok_or_else(|| SyncError::transform("metadata query returned no data"))
    }
}

#[async_trait]
impl RunSource for DbtCloudClient {
    #[instrument(skip(self))]
    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunDescriptor>> {
        let url = runs_url(&self.api_base_url, self.account_id);
        let params = [
            ("order_by", "-created_at".to_string()),
            ("limit", query.limit.to_string()),
            ("include_related", "trigger".to_string()),
            ("job_definition_id", query.job_id.to_string()),
        ];

        info!("Calling dbt Cloud runs API");
        let response = send_with_retry(&self.retry, "dbt run list", || {
            self.client.get(&url).bearer_auth(&self.token).query(&params)
        })
        .await?;
        let response = Self::check(response).await?;

        let envelope: Envelope<Vec<ApiRun>> = response.json().await?;
        let runs = envelope
            .data
            .into_iter()
            .map(RunDescriptor::try_from)
            .collect::<Result<Vec<_>>>()?;
        debug!(count = runs.len(), "Fetched runs");
        Ok(runs)
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: i64) -> Result<RunDescriptor> {
        let url = run_url(&self.api_base_url, self.account_id, run_id);

        let response = send_with_retry(&self.retry, "dbt run detail", || {
            self.client
                .get(&url)
                .bearer_auth(&self.token)
                .query(&[("include_related", "trigger")])
        })
        .await?;
        let response = Self::check(response).await?;

        let envelope: Envelope<ApiRun> = response.json().await?;
        RunDescriptor::try_from(envelope.data)
    }
}
