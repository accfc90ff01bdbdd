//! Metadata repository interface
//!
//! The file store only talks to its metadata through these traits, so the
//! same entity and sweep logic runs against PostgreSQL or the in-memory
//! repository used in tests.

use crate::error::Result;
use crate::types::StoredFileRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence operations needed by stored files and the maintenance sweep
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Get a record by id
    async fn find_by_id(&self, id: &str) -> Result<Option<StoredFileRecord>>;

    /// Get the record caching `resource` in `store_id` (unique per store)
    async fn find_by_resource(
        &self,
        store_id: &str,
        resource: &str,
    ) -> Result<Option<StoredFileRecord>>;

    /// Insert or update a record, keyed by id
    async fn save(&self, record: &StoredFileRecord) -> Result<()>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Records of `store_id` whose timeout lies strictly before `now`
    async fn query_expired(
        &self,
        store_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredFileRecord>>;

    /// Up to `limit` records of `store_id`, least recently accessed first
    async fn query_sorted_by_last_accessed(
        &self,
        store_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredFileRecord>>;

    /// Sum of known sizes in `store_id`
    async fn sum_size(&self, store_id: &str) -> Result<u64>;

    /// Start a transaction. Dropping it without [`RepositoryTransaction::commit`]
    /// rolls every change back.
    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>>;

    /// Compact storage after many rows were removed
    async fn optimize(&self, store_id: &str) -> Result<()>;
}

/// A scoped metadata transaction
#[async_trait]
pub trait RepositoryTransaction: Send {
    async fn save(&mut self, record: &StoredFileRecord) -> Result<()>;

    /// Delete a record, returning whether it existed. A failing delete does not
    /// invalidate the rest of the transaction.
    async fn delete(&mut self, id: &str) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
