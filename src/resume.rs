//! Resume filter: drop partition directories already present in the
//! destination table.
//!
//! The warehouse stores the date partition canonically; object keys carry it
//! in whatever raw format the writer used. Loaded partitions are re-rendered
//! into the raw path format before comparison so a `d=20240102` directory
//! matches a `2024-01-02` warehouse row.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::error::{BulkError, ResumeKeySnafu, ResumeSnafu};
use crate::metadata::ObjectMetadata;
use crate::sql;
use crate::storage::ObjectEntry;
use crate::warehouse::{TableRef, Warehouse};

/// Remove every candidate directory whose partition tuple is already
/// materialized in the destination table.
///
/// All candidates are assumed to share one table and partition layout; the
/// first candidate is used as the representative. If the destination table
/// does not exist yet, nothing has been loaded and the candidates pass
/// through untouched.
pub async fn remove_loaded_objects(
    warehouse: &dyn Warehouse,
    dataset: &str,
    mut candidates: BTreeMap<String, ObjectEntry>,
) -> Result<BTreeMap<String, ObjectEntry>, BulkError> {
    let Some(representative) = candidates.values().next() else {
        return Ok(candidates);
    };
    let key = representative.key.clone();
    let meta = ObjectMetadata::parse(&key).context(ResumeKeySnafu { key: key.clone() })?;

    let table = TableRef::new(dataset, &meta.table_id);
    let exists = warehouse.table_exists(&table).await.context(ResumeSnafu)?;
    if !exists {
        debug!(table = %table, "destination table absent, nothing to resume");
        return Ok(candidates);
    }

    let prefix: Vec<&str> = key
        .split('/')
        .take(meta.first_partition_index)
        .collect();
    let (query, columns) = sql::partition_listing(dataset, &meta.table_id, &meta);
    let rows = warehouse
        .query_rows(&query, &columns)
        .await
        .context(ResumeSnafu)?;

    let before = candidates.len();
    for row in &rows {
        if let Some(directory) = loaded_directory(&prefix, &meta, &columns, row) {
            candidates.remove(&directory);
        }
    }
    info!(
        table = %table,
        loaded = rows.len(),
        remaining = candidates.len(),
        skipped = before - candidates.len(),
        "resume filter applied"
    );

    Ok(candidates)
}

/// Reconstruct the partition directory a warehouse row was loaded from.
fn loaded_directory(
    prefix: &[&str],
    meta: &ObjectMetadata,
    columns: &[String],
    row: &[String],
) -> Option<String> {
    let mut segments: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
    for (column, value) in columns.iter().zip(row) {
        let rendered = if *column == meta.partition_field {
            let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
            meta.date_format.render(date)
        } else {
            value.clone()
        };
        segments.push(format!("{column}={rendered}"));
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;

    use crate::error::WarehouseError;

    struct StubWarehouse {
        exists: bool,
        rows: Vec<Vec<String>>,
    }

    #[async_trait]
    impl Warehouse for StubWarehouse {
        async fn table_exists(&self, _table: &TableRef) -> Result<bool, WarehouseError> {
            Ok(self.exists)
        }

        async fn create_table(
            &self,
            _table: &TableRef,
            _schema: Option<&[TableFieldSchema]>,
            _partition_field: Option<&str>,
        ) -> Result<(), WarehouseError> {
            unreachable!("resume filter never creates tables")
        }

        async fn get_schema(
            &self,
            _table: &TableRef,
        ) -> Result<Vec<TableFieldSchema>, WarehouseError> {
            Ok(Vec::new())
        }

        async fn add_columns(
            &self,
            _table: &TableRef,
            _additions: &[TableFieldSchema],
        ) -> Result<(), WarehouseError> {
            Ok(())
        }

        async fn load_objects(
            &self,
            _bucket: &str,
            _source_glob: &str,
            _table: &TableRef,
        ) -> Result<(), WarehouseError> {
            Ok(())
        }

        async fn append_query(
            &self,
            _sql: &str,
            _destination: &TableRef,
        ) -> Result<(), WarehouseError> {
            Ok(())
        }

        async fn query_rows(
            &self,
            _sql: &str,
            _columns: &[String],
        ) -> Result<Vec<Vec<String>>, WarehouseError> {
            Ok(self.rows.clone())
        }

        async fn delete_table(&self, _table: &TableRef) -> Result<(), WarehouseError> {
            Ok(())
        }
    }

    fn candidate(key: &str) -> (String, ObjectEntry) {
        let directory = key.rsplit_once('/').unwrap().0.to_string();
        (
            directory,
            ObjectEntry {
                key: key.to_string(),
                last_modified: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            },
        )
    }

    #[tokio::test]
    async fn missing_table_passes_candidates_through() {
        let warehouse = StubWarehouse {
            exists: false,
            rows: vec![vec!["2024-01-02".to_string()]],
        };
        let candidates: BTreeMap<_, _> =
            [candidate("ns/v1/d=20240102/part-0.parquet")].into();

        let remaining = remove_loaded_objects(&warehouse, "telemetry", candidates.clone())
            .await
            .unwrap();
        assert_eq!(remaining.len(), candidates.len());
    }

    #[tokio::test]
    async fn loaded_partition_is_removed_in_raw_date_format() {
        let warehouse = StubWarehouse {
            exists: true,
            rows: vec![vec!["2024-01-02".to_string(), "linux".to_string()]],
        };
        let candidates: BTreeMap<_, _> = [
            candidate("ns/v1/d=20240102/os=linux/part-0.parquet"),
            candidate("ns/v1/d=20240102/os=windows/part-0.parquet"),
            candidate("ns/v1/d=20240103/os=linux/part-0.parquet"),
        ]
        .into();

        let remaining = remove_loaded_objects(&warehouse, "telemetry", candidates)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains_key("ns/v1/d=20240102/os=linux"));
        assert!(remaining.contains_key("ns/v1/d=20240102/os=windows"));
        assert!(remaining.contains_key("ns/v1/d=20240103/os=linux"));
    }

    #[tokio::test]
    async fn empty_candidates_skip_the_warehouse_entirely() {
        let warehouse = StubWarehouse {
            exists: true,
            rows: Vec::new(),
        };

        let remaining = remove_loaded_objects(&warehouse, "telemetry", BTreeMap::new())
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
