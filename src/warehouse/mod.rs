//! Warehouse gateway: the narrow surface the pipeline drives.
//!
//! Every table operation the loader needs goes through [`Warehouse`], so the
//! pipeline and orchestrator can be exercised against an in-process fake.

use std::fmt;

use async_trait::async_trait;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;

use crate::error::WarehouseError;

mod bigquery;

pub use bigquery::BigQueryWarehouse;

/// A dataset-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table_id)
    }
}

/// Table operations the load-merge pipeline depends on.
///
/// Implementations classify their service errors into the
/// [`WarehouseError`] categories; callers branch only on the category.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Whether the table exists.
    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError>;

    /// Create a table, optionally with an explicit schema and a daily date
    /// partition on `partition_field`.
    ///
    /// Returns [`WarehouseError::Conflict`] when the table already exists.
    async fn create_table(
        &self,
        table: &TableRef,
        schema: Option<&[TableFieldSchema]>,
        partition_field: Option<&str>,
    ) -> Result<(), WarehouseError>;

    /// The table's current schema fields.
    async fn get_schema(&self, table: &TableRef) -> Result<Vec<TableFieldSchema>, WarehouseError>;

    /// Extend the table's schema with new fields. Additive only.
    async fn add_columns(
        &self,
        table: &TableRef,
        additions: &[TableFieldSchema],
    ) -> Result<(), WarehouseError>;

    /// Load every object matching `source_glob` in `bucket` into the table,
    /// inferring the schema from the files.
    async fn load_objects(
        &self,
        bucket: &str,
        source_glob: &str,
        table: &TableRef,
    ) -> Result<(), WarehouseError>;

    /// Run `sql` and append its result rows to `destination`.
    async fn append_query(&self, sql: &str, destination: &TableRef)
        -> Result<(), WarehouseError>;

    /// Run `sql` and return the named columns of every row as strings.
    /// NULL cells come back as empty strings.
    async fn query_rows(
        &self,
        sql: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<String>>, WarehouseError>;

    /// Drop a table. Deleting a table that does not exist is not an error.
    async fn delete_table(&self, table: &TableRef) -> Result<(), WarehouseError>;
}
