use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use snowdrift::{
    BigQueryWarehouse, BulkOptions, DEFAULT_DATASET, DEFAULT_SCRATCH_DATASET, ObjectStorage, bulk,
    init_tracing,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "snowdrift", about = "Bulk-load partitioned parquet into BigQuery")]
struct CliArgs {
    /// Source bucket.
    #[arg(short, long)]
    bucket: String,

    /// Object key prefix to load.
    #[arg(short, long)]
    prefix: String,

    /// Google Cloud project holding the datasets.
    #[arg(long)]
    project: String,

    /// Destination dataset.
    #[arg(short, long, default_value = DEFAULT_DATASET)]
    dataset: String,

    /// Scratch dataset for staging tables.
    #[arg(long, default_value = DEFAULT_SCRATCH_DATASET)]
    scratch_dataset: String,

    /// Load everything into this table instead of the path-derived ids.
    #[arg(short, long)]
    alias: Option<String>,

    /// Worker count.
    #[arg(short, long, default_value_t = 10)]
    concurrency: usize,

    /// Load each object individually instead of one wildcard per directory.
    #[arg(short = 'G', long)]
    no_glob_load: bool,

    /// Reload partitions even when they are already in the destination.
    #[arg(short = 'R', long)]
    no_resume: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("snowdrift: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let storage = ObjectStorage::gcs(&args.bucket)?;
    let warehouse = Arc::new(BigQueryWarehouse::connect(&args.project).await?);

    let options = BulkOptions {
        concurrency: args.concurrency,
        glob_load: !args.no_glob_load,
        resume_load: !args.no_resume,
        dest_dataset: args.dataset,
        scratch_dataset: args.scratch_dataset,
        alias: args.alias,
    };

    let summary = bulk(&storage, warehouse, &args.prefix, options).await?;
    info!(
        loaded = summary.loaded,
        skipped = summary.skipped,
        failed = summary.failed,
        "done"
    );
    Ok(())
}
