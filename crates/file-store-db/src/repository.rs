use crate::stored_files;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use file_store::{
    FileStoreError, MetadataRepository, RepositoryTransaction, Result, StoredFileRecord,
};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tracing::debug;

/// [`MetadataRepository`] backed by the `stored_files` table
#[derive(Debug, Clone)]
pub struct PgMetadataRepository {
    pool: PgPool,
}

impl PgMetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataRepository for PgMetadataRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<StoredFileRecord>> {
        let row = stored_files::get(&self.pool, id)
            .await
            .map_err(FileStoreError::metadata)?;
        Ok(row.map(Into::into))
    }

    async fn find_by_resource(
        &self,
        store_id: &str,
        resource: &str,
    ) -> Result<Option<StoredFileRecord>> {
        let row = stored_files::get_by_resource(&self.pool, store_id, resource)
            .await
            .map_err(FileStoreError::metadata)?;
        Ok(row.map(Into::into))
    }

    async fn save(&self, record: &StoredFileRecord) -> Result<()> {
        stored_files::upsert(&self.pool, record, Utc::now())
            .await
            .map_err(FileStoreError::metadata)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        stored_files::delete(&self.pool, id)
            .await
            .map_err(FileStoreError::metadata)
    }

    async fn query_expired(
        &self,
        store_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredFileRecord>> {
        let rows = stored_files::get_expired(&self.pool, store_id, now)
            .await
            .map_err(FileStoreError::metadata)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn query_sorted_by_last_accessed(
        &self,
        store_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredFileRecord>> {
        let rows = stored_files::get_least_recently_accessed(&self.pool, store_id, limit.into())
            .await
            .map_err(FileStoreError::metadata)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn sum_size(&self, store_id: &str) -> Result<u64> {
        let total = stored_files::total_size(&self.pool, store_id)
            .await
            .map_err(FileStoreError::metadata)?;
        Ok(total.max(0) as u64)
    }

    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>> {
        let tx = self.pool.begin().await.map_err(FileStoreError::metadata)?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn optimize(&self, store_id: &str) -> Result<()> {
        debug!(store_id, "Vacuuming stored_files");
        stored_files::vacuum(&self.pool)
            .await
            .map_err(FileStoreError::metadata)
    }
}

/// Open database transaction. Each delete runs inside its own savepoint so a
/// failing row leaves the rest of the transaction intact.
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RepositoryTransaction for PgTransaction {
    async fn save(&mut self, record: &StoredFileRecord) -> Result<()> {
        stored_files::upsert(&mut *self.tx, record, Utc::now())
            .await
            .map_err(FileStoreError::metadata)
    }

    async fn delete(&mut self, id: &str) -> Result<bool> {
        let mut savepoint = Acquire::begin(&mut self.tx)
            .await
            .map_err(FileStoreError::metadata)?;
        let deleted = stored_files::delete(&mut *savepoint, id)
            .await
            .map_err(FileStoreError::metadata)?;
        savepoint.commit().await.map_err(FileStoreError::metadata)?;
        Ok(deleted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(FileStoreError::metadata)
    }
}
