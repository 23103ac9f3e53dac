//! Load-merge pipeline for a single object or partition directory.
//!
//! Each task stages its files into a fresh scratch table, lets the warehouse
//! infer the schema, reconciles the destination additively, and appends the
//! scratch rows with the path-derived partition columns synthesized in. The
//! scratch table is dropped whether the merge succeeds or not.

use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bulk::LoadTask;
use crate::error::{MetadataSnafu, TaskError, WarehouseSnafu};
use crate::metadata::{ObjectMetadata, ignore_key};
use crate::schema;
use crate::sql;
use crate::warehouse::{TableRef, Warehouse};

/// What became of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The object's rows were appended to the destination table.
    Loaded,
    /// The key matched an ignore pattern; nothing was done.
    Skipped,
}

pub struct LoadPipeline {
    warehouse: Arc<dyn Warehouse>,
    dest_dataset: String,
    scratch_dataset: String,
    /// Overrides the path-derived table id when set.
    alias: Option<String>,
    /// Serializes destination-table creation so concurrent workers race the
    /// warehouse at most once per run.
    create_lock: Mutex<()>,
}

impl LoadPipeline {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        dest_dataset: impl Into<String>,
        scratch_dataset: impl Into<String>,
        alias: Option<String>,
    ) -> Self {
        Self {
            warehouse,
            dest_dataset: dest_dataset.into(),
            scratch_dataset: scratch_dataset.into(),
            alias,
            create_lock: Mutex::new(()),
        }
    }

    /// Run one task end to end.
    pub async fn run(&self, task: &LoadTask) -> Result<TaskOutcome, TaskError> {
        if ignore_key(&task.key) {
            debug!(key = %task.key, "ignored object key");
            return Ok(TaskOutcome::Skipped);
        }

        let meta = ObjectMetadata::parse(&task.key).context(MetadataSnafu {
            key: task.key.clone(),
        })?;
        let table_id = self.alias.clone().unwrap_or_else(|| meta.table_id.clone());
        let destination = TableRef::new(&self.dest_dataset, &table_id);
        let scratch = TableRef::new(&self.scratch_dataset, meta.scratch_table_id());

        self.stage(task, &meta, &scratch).await?;

        let merged = self.merge(&meta, &scratch, &destination).await;
        if let Err(e) = self.warehouse.delete_table(&scratch).await {
            warn!(table = %scratch, error = %e, "scratch table cleanup failed");
        }
        merged?;

        info!(
            key = %task.key,
            table = %destination,
            partition = %meta.partition_value,
            "object loaded"
        );
        Ok(TaskOutcome::Loaded)
    }

    /// Stage the task's files into the scratch table.
    async fn stage(
        &self,
        task: &LoadTask,
        meta: &ObjectMetadata,
        scratch: &TableRef,
    ) -> Result<(), TaskError> {
        self.warehouse
            .create_table(scratch, None, None)
            .await
            .context(WarehouseSnafu {
                table_id: meta.table_id.clone(),
                stage: "staging",
            })?;

        let glob = source_glob(task);
        let loaded = self
            .warehouse
            .load_objects(&task.bucket, &glob, scratch)
            .await;
        if let Err(e) = loaded {
            // A failed load can leave a half-filled scratch table behind.
            if let Err(cleanup) = self.warehouse.delete_table(scratch).await {
                warn!(table = %scratch, error = %cleanup, "scratch table cleanup failed");
            }
            return Err(e).context(WarehouseSnafu {
                table_id: meta.table_id.clone(),
                stage: "staging",
            });
        }
        Ok(())
    }

    /// Reconcile the destination schema and append the scratch rows.
    async fn merge(
        &self,
        meta: &ObjectMetadata,
        scratch: &TableRef,
        destination: &TableRef,
    ) -> Result<(), TaskError> {
        let scratch_schema =
            self.warehouse
                .get_schema(scratch)
                .await
                .context(WarehouseSnafu {
                    table_id: meta.table_id.clone(),
                    stage: "schema-extract",
                })?;
        let proposed = schema::with_partition_fields(&scratch_schema, meta);

        {
            let _guard = self.create_lock.lock().await;
            let exists =
                self.warehouse
                    .table_exists(destination)
                    .await
                    .context(WarehouseSnafu {
                        table_id: meta.table_id.clone(),
                        stage: "table-create",
                    })?;
            if !exists {
                let created = self
                    .warehouse
                    .create_table(destination, Some(&proposed), Some(&meta.partition_field))
                    .await;
                match created {
                    Ok(()) => info!(table = %destination, "destination table created"),
                    Err(e) if e.is_conflict() => {
                        debug!(table = %destination, "lost the create race, continuing")
                    }
                    Err(e) => {
                        return Err(e).context(WarehouseSnafu {
                            table_id: meta.table_id.clone(),
                            stage: "table-create",
                        });
                    }
                }
            }
        }

        let current = self
            .warehouse
            .get_schema(destination)
            .await
            .context(WarehouseSnafu {
                table_id: meta.table_id.clone(),
                stage: "schema-evolve",
            })?;
        let additions = schema::diff(&current, &proposed);
        if !additions.is_empty() {
            info!(
                table = %destination,
                added = additions.len(),
                "extending destination schema"
            );
            self.warehouse
                .add_columns(destination, &additions)
                .await
                .context(WarehouseSnafu {
                    table_id: meta.table_id.clone(),
                    stage: "schema-evolve",
                })?;
        }

        let select = sql::merge_select(&self.scratch_dataset, &scratch.table_id, meta);
        self.warehouse
            .append_query(&select, destination)
            .await
            .context(WarehouseSnafu {
                table_id: meta.table_id.clone(),
                stage: "merge",
            })
    }
}

/// The load-job source pattern for a task.
///
/// Directory tasks load every sibling object with one wildcard; the suffix
/// keeps the wildcard from matching non-data files next to the parquet
/// output.
fn source_glob(task: &LoadTask) -> String {
    match &task.directory {
        None => task.key.clone(),
        Some(directory) => {
            let mut glob = format!("{directory}/*");
            for suffix in ["parquet", "internal"] {
                if task.key.ends_with(suffix) {
                    glob.push_str(suffix);
                    break;
                }
            }
            glob
        }
    }
}
