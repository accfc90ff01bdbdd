//! PostgreSQL persistence for file store metadata

pub mod stored_files;
pub mod types;

mod repository;

pub use repository::PgMetadataRepository;
pub use sqlx::postgres::PgPool;
pub use types::*;
use tracing::info;

/// Run all database migrations (versioned, tracked in `_sqlx_migrations` table)
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Running file store migrations...");
    sqlx::migrate!()
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
    info!("File store migrations completed");
    Ok(())
}
