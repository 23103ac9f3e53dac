//! snowdrift loads partitioned parquet output from object storage into a
//! columnar warehouse.
//!
//! Object keys carry `field=value` partition markers; the loader derives the
//! destination table and partition columns from the path, stages each
//! object through a scratch table, evolves the destination schema additively,
//! and appends the rows with the partition values synthesized in. Runs are
//! idempotent to restart: already-loaded partitions are filtered out up
//! front.

pub mod bulk;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod resume;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod warehouse;

pub use bulk::{
    BulkOptions, BulkSummary, DEFAULT_DATASET, DEFAULT_SCRATCH_DATASET, LoadTask, bulk,
};
pub use error::{BulkError, MetadataError, StorageError, TaskError, WarehouseError};
pub use metadata::ObjectMetadata;
pub use pipeline::{LoadPipeline, TaskOutcome};
pub use storage::{ObjectEntry, ObjectStorage};
pub use warehouse::{BigQueryWarehouse, TableRef, Warehouse};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` controls the filter; the default is `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
