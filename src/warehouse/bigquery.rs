//! BigQuery-backed [`Warehouse`] implementation.
//!
//! Load and append jobs run through the asynchronous jobs API and are polled
//! to completion. Service errors are folded into the [`WarehouseError`]
//! categories here, in one place.

use std::time::Duration;

use async_trait::async_trait;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::job::Job;
use gcp_bigquery_client::model::job_configuration::JobConfiguration;
use gcp_bigquery_client::model::job_configuration_load::JobConfigurationLoad;
use gcp_bigquery_client::model::job_configuration_query::JobConfigurationQuery;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use gcp_bigquery_client::model::table::Table;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_reference::TableReference;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::model::time_partitioning::TimePartitioning;
use tracing::debug;

use super::{TableRef, Warehouse};
use crate::error::WarehouseError;
use crate::schema;

/// Interval between job status polls.
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Job failure reasons worth retrying.
const TRANSIENT_JOB_REASONS: [&str; 2] = ["internalError", "backendError"];

pub struct BigQueryWarehouse {
    client: Client,
    project_id: String,
}

impl BigQueryWarehouse {
    /// Connect using application default credentials.
    pub async fn connect(project_id: &str) -> Result<Self, WarehouseError> {
        let client = Client::from_application_default_credentials()
            .await
            .map_err(|e| classify(e, "connect"))?;
        Ok(Self {
            client,
            project_id: project_id.to_string(),
        })
    }

    fn table_reference(&self, table: &TableRef) -> TableReference {
        TableReference::new(&self.project_id, &table.dataset, &table.table_id)
    }

    /// Insert a job and poll it to completion.
    async fn run_job(&self, job: Job, operation: &str) -> Result<(), WarehouseError> {
        let inserted = self
            .client
            .job()
            .insert(&self.project_id, job)
            .await
            .map_err(|e| classify(e, operation))?;

        let reference = inserted.job_reference.ok_or_else(|| fatal(
            operation,
            "job accepted without a job reference",
        ))?;
        let job_id = reference
            .job_id
            .ok_or_else(|| fatal(operation, "job accepted without a job id"))?;

        loop {
            let job = self
                .client
                .job()
                .get_job(&self.project_id, &job_id, reference.location.as_deref())
                .await
                .map_err(|e| classify(e, operation))?;

            let Some(status) = job.status else {
                tokio::time::sleep(JOB_POLL_INTERVAL).await;
                continue;
            };
            if status.state.as_deref() != Some("DONE") {
                debug!(job_id = %job_id, state = ?status.state, "job still running");
                tokio::time::sleep(JOB_POLL_INTERVAL).await;
                continue;
            }

            return match status.error_result {
                None => Ok(()),
                Some(error) => {
                    let reason = error.reason.unwrap_or_default();
                    let message = error.message.unwrap_or_default();
                    if TRANSIENT_JOB_REASONS.contains(&reason.as_str()) {
                        Err(WarehouseError::Transient {
                            operation: operation.to_string(),
                            message: format!("{reason}: {message}"),
                        })
                    } else {
                        Err(fatal(operation, &format!("{reason}: {message}")))
                    }
                }
            };
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let found = self
            .client
            .table()
            .get(&self.project_id, &table.dataset, &table.table_id, None)
            .await;
        match found {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, "table-get") {
                WarehouseError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: Option<&[TableFieldSchema]>,
        partition_field: Option<&str>,
    ) -> Result<(), WarehouseError> {
        let mut definition = Table::new(
            &self.project_id,
            &table.dataset,
            &table.table_id,
            TableSchema::new(schema.map(<[_]>::to_vec).unwrap_or_default()),
        );
        if schema.is_none() {
            definition.schema.fields = None;
        }
        if let Some(field) = partition_field {
            let mut partitioning = TimePartitioning::per_day();
            partitioning.field = Some(field.to_string());
            definition.time_partitioning = Some(partitioning);
        }

        self.client
            .table()
            .create(definition)
            .await
            .map(|_| ())
            .map_err(|e| classify_create(e, table))
    }

    async fn get_schema(&self, table: &TableRef) -> Result<Vec<TableFieldSchema>, WarehouseError> {
        let found = self
            .client
            .table()
            .get(&self.project_id, &table.dataset, &table.table_id, None)
            .await
            .map_err(|e| classify(e, "table-get"))?;
        Ok(found.schema.fields.unwrap_or_default())
    }

    async fn add_columns(
        &self,
        table: &TableRef,
        additions: &[TableFieldSchema],
    ) -> Result<(), WarehouseError> {
        let mut found = self
            .client
            .table()
            .get(&self.project_id, &table.dataset, &table.table_id, None)
            .await
            .map_err(|e| classify(e, "table-get"))?;

        let current = found.schema.fields.take().unwrap_or_default();
        found.schema.fields = Some(schema::merge_additions(&current, additions));

        self.client
            .table()
            .update(&self.project_id, &table.dataset, &table.table_id, found)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "table-update"))
    }

    async fn load_objects(
        &self,
        bucket: &str,
        source_glob: &str,
        table: &TableRef,
    ) -> Result<(), WarehouseError> {
        let job = Job {
            configuration: Some(JobConfiguration {
                load: Some(JobConfigurationLoad {
                    source_uris: Some(vec![format!("gs://{bucket}/{source_glob}")]),
                    source_format: Some("PARQUET".to_string()),
                    destination_table: Some(self.table_reference(table)),
                    autodetect: Some(true),
                    schema_update_options: Some(vec![
                        "ALLOW_FIELD_ADDITION".to_string(),
                        "ALLOW_FIELD_RELAXATION".to_string(),
                    ]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.run_job(job, "load").await
    }

    async fn append_query(
        &self,
        sql: &str,
        destination: &TableRef,
    ) -> Result<(), WarehouseError> {
        let job = Job {
            configuration: Some(JobConfiguration {
                query: Some(JobConfigurationQuery {
                    query: sql.to_string(),
                    destination_table: Some(self.table_reference(destination)),
                    write_disposition: Some("WRITE_APPEND".to_string()),
                    use_legacy_sql: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.run_job(job, "append-query").await
    }

    async fn query_rows(
        &self,
        sql: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<String>>, WarehouseError> {
        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(sql))
            .await
            .map_err(|e| classify(e, "query"))?;

        let mut result_set = ResultSet::new_from_query_response(response);
        let mut rows = Vec::new();
        while result_set.next_row() {
            let mut row = Vec::with_capacity(columns.len());
            for column in columns {
                let cell = result_set
                    .get_string_by_name(column)
                    .map_err(|e| classify(e, "query"))?
                    .unwrap_or_default();
                row.push(cell);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn delete_table(&self, table: &TableRef) -> Result<(), WarehouseError> {
        let deleted = self
            .client
            .table()
            .delete(&self.project_id, &table.dataset, &table.table_id)
            .await;
        match deleted {
            Ok(()) => Ok(()),
            Err(e) => match classify(e, "table-delete") {
                WarehouseError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}

fn fatal(operation: &str, message: &str) -> WarehouseError {
    WarehouseError::Fatal {
        operation: operation.to_string(),
        message: message.to_string(),
    }
}

/// Fold a service error into a [`WarehouseError`] category.
fn classify(error: BQError, operation: &str) -> WarehouseError {
    if let BQError::ResponseError { error } = &error {
        match error.error.code {
            404 => {
                return WarehouseError::NotFound {
                    table: operation.to_string(),
                };
            }
            409 => {
                return WarehouseError::Conflict {
                    table: operation.to_string(),
                };
            }
            // 500 and 503 are the retryable service errors.
            500 | 503 => {
                return WarehouseError::Transient {
                    operation: operation.to_string(),
                    message: error.error.message.clone(),
                };
            }
            _ => {}
        }
    }
    fatal(operation, &error.to_string())
}

/// Create-time classification carries the table name so conflicts read well.
fn classify_create(error: BQError, table: &TableRef) -> WarehouseError {
    match classify(error, "table-create") {
        WarehouseError::NotFound { .. } => WarehouseError::NotFound {
            table: table.to_string(),
        },
        WarehouseError::Conflict { .. } => WarehouseError::Conflict {
            table: table.to_string(),
        },
        other => other,
    }
}
