//! Bucket Sync Daemon
//!
//! Periodically reconciles a target bucket against a source bucket. Each run
//! lists both buckets, computes the copy/update/delete plan and applies it,
//! then logs a structured run report.
//!
//! Usage: `bucket-sync [--config <path.toml>]`
//!
//! ## Environment Variables
//!
//! Environment variables override values from the config file. A `.env`
//! file in the working directory is loaded first; variables already set in
//! the process environment take precedence over it.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | SOURCE_BUCKET | omnisync-source | Bucket to copy from |
//! | TARGET_BUCKET | omnisync-target | Bucket to copy into |
//! | DELETE_RULE | KEEP_ALL | KEEP_ALL or DELETE_IF_SOURCE_DELETED |
//! | JOB_RUN_INTERVAL_SECONDS | 30 | Seconds between runs |
//! | SYNC_BIDIRECTIONAL | false | Also sync target -> source each tick |
//! | SYNC_CONCURRENCY | 16 | Store operations in flight while applying |
//! | SYNC_OVERLAP | skip | skip or queue ticks missed during a long run |
//! | SYNC_RUN_TIMEOUT_SECS | - | Cancel runs that take longer than this |
//!
//! ## Retries
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | SYNC_MAX_ATTEMPTS | 5 | Attempts per item or listing page |
//! | SYNC_BASE_DELAY_MS | 200 | First backoff delay |
//! | SYNC_MAX_DELAY_MS | 10000 | Backoff cap |
//! | SYNC_CALL_TIMEOUT_MS | 30000 | Timeout for a single store call |
//!
//! ## Store
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | SYNC_STORE_TYPE | localfs | memory, localfs, or s3 |
//! | SYNC_DATA_PATH | ./data | LocalFs base path, one directory per bucket |
//! | SYNC_S3_ENDPOINT | - | MinIO endpoint URL |
//! | AWS_ACCESS_KEY_ID | - | S3 credentials |
//! | AWS_SECRET_ACCESS_KEY | - | S3 credentials |
//! | AWS_REGION | us-east-1 | S3 region |
//!
//! ## Logging
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | RUST_LOG | info | Log filter |
//! | SYNC_LOG_FORMAT | text | text or json |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use bucket_sync::config::{StoreType, SyncConfig};
use bucket_sync::observability::init_tracing;
use bucket_sync::store::{InMemoryObjectStore, LocalFsObjectStore, ObjectStore};
use bucket_sync::sync::{Reconciler, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn parse_args() -> Result<Option<PathBuf>, BoxError> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("Usage: bucket-sync [--config <path.toml>]");
                std::process::exit(0);
            }
            other => return Err(format!("Unknown argument: {}", other).into()),
        }
    }
    Ok(config_path)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config_path = parse_args()?;
    dotenvy::dotenv().ok();
    let config = SyncConfig::load(config_path.as_deref())?;
    init_tracing(&config.log)?;

    info!(
        source = %config.source_bucket,
        target = %config.target_bucket,
        delete_rule = %config.delete_rule,
        store = %config.store.store_type,
        interval_secs = config.interval_secs,
        bidirectional = config.bidirectional,
        "Bucket sync starting"
    );

    match config.store.store_type {
        StoreType::Memory => {
            let store = InMemoryObjectStore::new();
            store.create_bucket(&config.source_bucket);
            store.create_bucket(&config.target_bucket);
            serve(Arc::new(store), &config).await
        }
        StoreType::LocalFs => {
            std::fs::create_dir_all(&config.store.data_path)?;
            let store = LocalFsObjectStore::new(config.store.data_path.clone());
            store.create_bucket(&config.source_bucket)?;
            store.create_bucket(&config.target_bucket)?;
            info!(path = %config.store.data_path.display(), "Using local filesystem store");
            serve(Arc::new(store), &config).await
        }
        #[cfg(feature = "s3")]
        StoreType::S3 => {
            let store = bucket_sync::store::S3ObjectStore::new(config.store.s3.clone());
            serve(Arc::new(store), &config).await
        }
        #[cfg(not(feature = "s3"))]
        StoreType::S3 => Err(bucket_sync::error::ConfigError::UnsupportedStore(
            "s3 (rebuild with --features s3)".to_string(),
        )
        .into()),
    }
}

async fn serve<S: ObjectStore>(store: Arc<S>, config: &SyncConfig) -> Result<(), BoxError> {
    let reconciler = Arc::new(Reconciler::new(store, config.reconciler_config()));
    let scheduler = Scheduler::new(reconciler, config.scheduler_config());

    let shutdown = CancellationToken::new();
    let handle = scheduler.spawn(shutdown.clone());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, finishing in-flight work"),
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
        }
        ctrl_c.cancel();
    });

    let stats = handle.await?;
    info!(
        ticks = stats.ticks,
        runs = stats.runs,
        failed_runs = stats.failed_runs,
        partially_failed_runs = stats.partially_failed_runs,
        "Bucket sync stopped"
    );
    Ok(())
}
