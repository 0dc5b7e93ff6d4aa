//! Redshift Data API implementation of [`Warehouse`]

use async_trait::async_trait;
use aws_sdk_redshiftdata::config::Region;
use aws_sdk_redshiftdata::error::DisplayErrorContext;
use aws_sdk_redshiftdata::types::{Field, StatusString};
use aws_sdk_redshiftdata::Client;
use tracing::{debug, info, instrument};

use super::{Cell, Row, StatementId, StatementStatus, Warehouse};
use crate::config::WarehouseConfig;
use crate::error::{Result, SyncError};

#[derive(Clone)]
pub struct RedshiftDataWarehouse {
    client: Client,
    database: String,
    cluster_identifier: Option<String>,
    workgroup_name: Option<String>,
    db_user: Option<String>,
    secret_arn: Option<String>,
}

impl RedshiftDataWarehouse {
    pub async fn new(config: &WarehouseConfig) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        info!(
            database = %config.database,
            cluster = ?config.cluster_identifier,
            workgroup = ?config.workgroup_name,
            "Warehouse client initialized"
        );

        Self {
            client: Client::new(&shared),
            database: config.database.clone(),
            cluster_identifier: config.cluster_identifier.clone(),
            workgroup_name: config.workgroup_name.clone(),
            db_user: config.db_user.clone(),
            secret_arn: config.secret_arn.clone(),
        }
    }
}

/// The value as an `Option`, whether given bare or already wrapped
fn present<T>(value: impl Into<Option<T>>) -> Option<T> {
    value.into()
}

fn warehouse_error(action: &str, err: impl std::error::Error) -> SyncError {
    SyncError::Warehouse(format!("Failed to {}: {}", action, DisplayErrorContext(err)))
}

fn to_cell(field: Field) -> Cell {
    match field {
        Field::StringValue(v) => Cell::Text(v),
        Field::LongValue(v) => Cell::Long(v),
        Field::DoubleValue(v) => Cell::Double(v),
        Field::BooleanValue(v) => Cell::Bool(v),
        _ => Cell::Null,
    }
}

#[async_trait]
impl Warehouse for RedshiftDataWarehouse {
    #[instrument(skip(self, sql))]
    async fn submit(&self, sql: &str) -> Result<StatementId> {
        let output = self
            .client
            .execute_statement()
            .database(&self.database)
            .set_cluster_identifier(self.cluster_identifier.clone())
            .set_workgroup_name(self.workgroup_name.clone())
            .set_db_user(self.db_user.clone())
            .set_secret_arn(self.secret_arn.clone())
            .sql(sql)
            .send()
            .await
            .map_err(|e| warehouse_error("submit statement", e))?;

        let id = present::<String>(output.id)
            .ok_or_else(|| SyncError::Warehouse("statement submitted without an id".into()))?;
        Ok(StatementId(id))
    }

    async fn describe(&self, id: &StatementId) -> Result<StatementStatus> {
        let output = self
            .client
            .describe_statement()
            .id(&id.0)
            .send()
            .await
            .map_err(|e| warehouse_error("describe statement", e))?;

        let status = present::<StatusString>(output.status);
        debug!(statement_id = %id, status = ?status, "Described statement");
        Ok(match status {
            Some(StatusString::Finished) => StatementStatus::Finished,
            Some(StatusString::Failed) => StatementStatus::Failed(
                output.error.unwrap_or_else(|| "no error message returned".to_string()),
            ),
            Some(StatusString::Aborted) => StatementStatus::Aborted,
            Some(StatusString::Submitted) => StatementStatus::Submitted,
            Some(StatusString::Picked) => StatementStatus::Picked,
            _ => StatementStatus::Started,
        })
    }

    async fn fetch_result(&self, id: &StatementId) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .get_statement_result()
                .id(&id.0)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| warehouse_error("fetch statement result", e))?;

            let records = present::<Vec<Vec<Field>>>(output.records).unwrap_or_default();
            rows.extend(
                records
                    .into_iter()
                    .map(|record| record.into_iter().map(to_cell).collect::<Row>()),
            );

            match output.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_accepts_bare_and_wrapped() {
        assert_eq!(present::<String>("stmt-1".to_string()), Some("stmt-1".to_string()));
        assert_eq!(present::<String>(Some("stmt-2".to_string())), Some("stmt-2".to_string()));
        assert_eq!(present::<Vec<u8>>(None::<Vec<u8>>), None);
    }
}
