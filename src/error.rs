//! Error types for the snowdrift bulk loader.
//!
//! Failures fall into a small set of categories that the worker pool maps
//! once at the call site: structural errors are logged and skipped, transient
//! service errors requeue the task, everything else is fatal for that task
//! only.

use snafu::prelude::*;

/// Errors from parsing an object key into load metadata.
///
/// These are structural: the object is laid out wrong, not the service.
/// They are never retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetadataError {
    /// No `field=value` segment anywhere in the key.
    #[snafu(display("no partition marker in object key {key}"))]
    NoPartitionMarker { key: String },

    /// The date partition is the first path segment, leaving nothing to
    /// derive a table id from.
    #[snafu(display("no table prefix before the date partition in {key}"))]
    MissingTablePrefix { key: String },

    /// No known date format matched the partition value.
    #[snafu(display("date format not detected for partition value {value}"))]
    UnknownDateFormat { value: String },
}

/// Errors from object-storage listing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Object store operation failed.
    #[snafu(display("storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },
}

/// Errors surfaced across the warehouse gateway boundary.
///
/// Gateway implementations classify their service errors into these
/// categories; the rest of the crate only branches on the category.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WarehouseError {
    /// A retryable service failure (internal error, unavailable).
    #[snafu(display("transient failure during {operation}: {message}"))]
    Transient { operation: String, message: String },

    /// The table already exists at create time.
    #[snafu(display("table {table} already exists"))]
    Conflict { table: String },

    /// The table does not exist.
    #[snafu(display("table {table} not found"))]
    NotFound { table: String },

    /// Any other service failure. Not retried.
    #[snafu(display("{operation} failed: {message}"))]
    Fatal { operation: String, message: String },
}

impl WarehouseError {
    /// Whether this error is in the retryable category.
    pub fn is_transient(&self) -> bool {
        matches!(self, WarehouseError::Transient { .. })
    }

    /// Whether this error is a benign create-time conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WarehouseError::Conflict { .. })
    }

    /// Whether this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::NotFound { .. })
    }
}

/// Per-task errors from the load-merge pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TaskError {
    /// The object key could not be parsed.
    #[snafu(display("{key}: invalid object key: {source}"))]
    Metadata { key: String, source: MetadataError },

    /// A warehouse call failed at a pipeline stage.
    #[snafu(display("{table_id}: {stage} failed: {source}"))]
    Warehouse {
        table_id: String,
        stage: &'static str,
        source: WarehouseError,
    },
}

impl TaskError {
    /// Whether the task should be requeued.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Warehouse { source, .. } if source.is_transient())
    }

    /// Whether the object itself is malformed (skip, never retry).
    pub fn is_structural(&self) -> bool {
        matches!(self, TaskError::Metadata { .. })
    }
}

/// Orchestrator-level errors that abort the whole bulk run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BulkError {
    /// Object listing failed during discovery.
    #[snafu(display("object listing failed: {source}"))]
    Listing { source: StorageError },

    /// The resume filter's warehouse lookup failed.
    #[snafu(display("resume filter failed: {source}"))]
    Resume { source: WarehouseError },

    /// The representative object key used by the resume filter is malformed.
    #[snafu(display("resume filter cannot parse {key}: {source}"))]
    ResumeKey { key: String, source: MetadataError },

    /// A worker task panicked.
    #[snafu(display("worker task failed: {source}"))]
    WorkerJoin { source: tokio::task::JoinError },
}
