//! File store maintenance runner
//!
//! Sweeps expired entries and enforces quotas for the configured stores.
//! Meant to be run periodically by an external scheduler, in which case the
//! stores should set `auto_maintenance`.

mod error;

use crate::error::{MaintenanceError, Result};
use clap::Parser;
use file_store::{FileStore, Settings};
use file_store_db::PgMetadataRepository;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "file-store-maintenance", about = "Expire and evict stored files")]
struct Args {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// JSON settings file; FILE_STORE_* variables are used when absent
    #[arg(long, env = "FILE_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// Store to sweep, repeatable. Defaults to every configured store.
    #[arg(long = "store")]
    stores: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("file_store=info".parse()?)
        .add_directive("file_store_maintenance=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    let args = Args::parse();
    let settings = load_settings(&args)?;
    let stores = stores_to_sweep(&args, &settings)?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&args.database_url)
        .await?;
    info!("Database connection established");
    file_store_db::migrate(&pool).await?;

    let store = FileStore::new(Arc::new(PgMetadataRepository::new(pool.clone())), settings);
    let maintenance = store.maintenance();

    let mut failed = Vec::new();
    for store_id in stores {
        match maintenance.run(&store_id).await {
            Ok(stats) => info!(
                store_id = %store_id,
                expired = stats.expired,
                evicted = stats.evicted,
                reclaimed_bytes = stats.reclaimed_bytes,
                "Store swept"
            ),
            Err(e) => {
                error!(store_id = %store_id, error = %e, "Store maintenance failed");
                failed.push(store_id);
            }
        }
    }

    pool.close().await;

    if failed.is_empty() {
        Ok(())
    } else {
        Err(MaintenanceError::SweepFailed(failed))
    }
}

fn load_settings(args: &Args) -> Result<Settings> {
    let settings = match &args.config {
        Some(path) => {
            info!("Loading settings from {:?}", path);
            Settings::from_json_file(path)?
        }
        None => Settings::from_env()?,
    };
    Ok(settings)
}

/// Requested stores, or every configured one in name order
fn stores_to_sweep(args: &Args, settings: &Settings) -> Result<Vec<String>> {
    let stores = if args.stores.is_empty() {
        let mut configured: Vec<String> = settings.stores.keys().cloned().collect();
        configured.sort();
        configured
    } else {
        args.stores.clone()
    };

    if stores.is_empty() {
        return Err(MaintenanceError::Config(
            "No file stores configured".to_string(),
        ));
    }
    Ok(stores)
}
