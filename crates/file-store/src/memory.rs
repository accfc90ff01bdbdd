//! In-memory metadata repository
//!
//! Keeps records in a shared map. Useful for tests and for single-process
//! embedders that do not need metadata to survive a restart.

use crate::error::{FileStoreError, Result};
use crate::repository::{MetadataRepository, RepositoryTransaction};
use crate::types::StoredFileRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

type Records = Arc<RwLock<HashMap<String, StoredFileRecord>>>;

/// Metadata repository backed by a map
#[derive(Clone, Default)]
pub struct MemoryRepository {
    records: Records,
    failing_deletes: Arc<RwLock<HashSet<String>>>,
    failing_sweeps: Arc<RwLock<bool>>,
    optimize_calls: Arc<RwLock<u64>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// How often [`MetadataRepository::optimize`] ran
    pub async fn optimize_calls(&self) -> u64 {
        *self.optimize_calls.read().await
    }

    /// Make every delete of `id` fail until the repository is dropped
    pub async fn fail_deletes_of(&self, id: &str) {
        self.failing_deletes.write().await.insert(id.to_string());
    }

    /// Make every expiry query fail until the repository is dropped
    pub async fn fail_sweeps(&self) {
        *self.failing_sweeps.write().await = true;
    }

    async fn check_delete(&self, id: &str) -> Result<()> {
        if self.failing_deletes.read().await.contains(id) {
            return Err(FileStoreError::metadata(std::io::Error::other(format!(
                "delete of '{}' rejected",
                id
            ))));
        }
        Ok(())
    }
}

/// Enforce the unique (store_id, resource) constraint
fn check_unique(
    records: &HashMap<String, StoredFileRecord>,
    record: &StoredFileRecord,
) -> Result<()> {
    let conflict = records.values().any(|other| {
        other.id != record.id
            && other.store_id == record.store_id
            && other.resource == record.resource
    });
    if conflict {
        return Err(FileStoreError::metadata(std::io::Error::other(format!(
            "resource '{}' is already stored in '{}'",
            record.resource, record.store_id
        ))));
    }
    Ok(())
}

#[async_trait]
impl MetadataRepository for MemoryRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<StoredFileRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_resource(
        &self,
        store_id: &str,
        resource: &str,
    ) -> Result<Option<StoredFileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.store_id == store_id && r.resource == resource)
            .cloned())
    }

    async fn save(&self, record: &StoredFileRecord) -> Result<()> {
        let mut records = self.records.write().await;
        check_unique(&records, record)?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.check_delete(id).await?;
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn query_expired(
        &self,
        store_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredFileRecord>> {
        if *self.failing_sweeps.read().await {
            return Err(FileStoreError::metadata(std::io::Error::other(format!(
                "expiry query on '{}' rejected",
                store_id
            ))));
        }
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.store_id == store_id && r.timeout.is_some_and(|t| t < now))
            .cloned()
            .collect())
    }

    async fn query_sorted_by_last_accessed(
        &self,
        store_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredFileRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<StoredFileRecord> = records
            .values()
            .filter(|r| r.store_id == store_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.time_last_accessed
                .cmp(&b.time_last_accessed)
                .then_with(|| a.id.cmp(&b.id))
        });
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn sum_size(&self, store_id: &str) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.store_id == store_id)
            .filter_map(|r| r.size)
            .map(|size| size.max(0) as u64)
            .sum())
    }

    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>> {
        Ok(Box::new(MemoryTransaction {
            repository: self.clone(),
            saves: HashMap::new(),
            deletes: HashSet::new(),
        }))
    }

    async fn optimize(&self, _store_id: &str) -> Result<()> {
        *self.optimize_calls.write().await += 1;
        Ok(())
    }
}

/// Buffers changes until commit
struct MemoryTransaction {
    repository: MemoryRepository,
    saves: HashMap<String, StoredFileRecord>,
    deletes: HashSet<String>,
}

#[async_trait]
impl RepositoryTransaction for MemoryTransaction {
    async fn save(&mut self, record: &StoredFileRecord) -> Result<()> {
        self.deletes.remove(&record.id);
        self.saves.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&mut self, id: &str) -> Result<bool> {
        self.repository.check_delete(id).await?;

        if self.deletes.contains(id) {
            return Ok(false);
        }

        let pending = self.saves.remove(id).is_some();
        let stored = self.repository.records.read().await.contains_key(id);
        self.deletes.insert(id.to_string());
        Ok(pending || stored)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut records = self.repository.records.write().await;

        for id in &self.deletes {
            records.remove(id);
        }
        for record in self.saves.values() {
            check_unique(&records, record)?;
        }
        for (id, record) in self.saves {
            records.insert(id, record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(store_id: &str, resource: &str, size: i64) -> StoredFileRecord {
        let mut record = StoredFileRecord::new(store_id, resource);
        record.size = Some(size);
        record.fill_defaults(Utc::now());
        record
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let repo = MemoryRepository::new();
        let r = record("cache", "https://example.com/a", 10);
        repo.save(&r).await.unwrap();

        assert_eq!(repo.find_by_id(&r.id).await.unwrap(), Some(r.clone()));
        assert_eq!(
            repo.find_by_resource("cache", "https://example.com/a")
                .await
                .unwrap(),
            Some(r.clone())
        );
        assert!(repo
            .find_by_resource("default", "https://example.com/a")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resource_is_unique_per_store() {
        let repo = MemoryRepository::new();
        repo.save(&record("cache", "r", 1)).await.unwrap();
        assert!(repo.save(&record("cache", "r", 1)).await.is_err());
        repo.save(&record("default", "r", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_sum_size_ignores_unknown_sizes() {
        let repo = MemoryRepository::new();
        repo.save(&record("cache", "a", 100)).await.unwrap();
        repo.save(&record("cache", "b", 50)).await.unwrap();
        let mut unknown = record("cache", "c", 0);
        unknown.size = None;
        repo.save(&unknown).await.unwrap();
        repo.save(&record("default", "d", 1000)).await.unwrap();

        assert_eq!(repo.sum_size("cache").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_query_expired_is_strict() {
        let repo = MemoryRepository::new();
        let now = Utc::now();

        let mut expired = record("cache", "a", 1);
        expired.timeout = Some(now - Duration::seconds(1));
        let mut boundary = record("cache", "b", 1);
        boundary.timeout = Some(now);
        let forever = record("cache", "c", 1);

        for r in [&expired, &boundary, &forever] {
            repo.save(r).await.unwrap();
        }

        let found = repo.query_expired("cache", now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired.id);
    }

    #[tokio::test]
    async fn test_sorted_by_last_accessed() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        for age in [5, 1, 3] {
            let mut r = record("cache", &format!("r{}", age), 1);
            r.time_last_accessed = Some(now - Duration::minutes(age));
            repo.save(&r).await.unwrap();
        }

        let sorted = repo.query_sorted_by_last_accessed("cache", 2).await.unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].resource, "r5");
        assert_eq!(sorted[1].resource, "r3");
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_drop() {
        let repo = MemoryRepository::new();
        let r = record("cache", "a", 1);
        repo.save(&r).await.unwrap();

        {
            let mut tx = repo.begin().await.unwrap();
            assert!(tx.delete(&r.id).await.unwrap());
        }
        assert!(repo.find_by_id(&r.id).await.unwrap().is_some());

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.delete(&r.id).await.unwrap());
        assert!(!tx.delete(&r.id).await.unwrap());
        tx.commit().await.unwrap();
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_delete_keeps_transaction_usable() {
        let repo = MemoryRepository::new();
        let a = record("cache", "a", 1);
        let b = record("cache", "b", 1);
        repo.save(&a).await.unwrap();
        repo.save(&b).await.unwrap();
        repo.fail_deletes_of(&a.id).await;

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.delete(&a.id).await.is_err());
        assert!(tx.delete(&b.id).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(repo.len().await, 1);
        assert!(repo.find_by_id(&a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failing_sweeps() {
        let repo = MemoryRepository::new();
        repo.fail_sweeps().await;
        assert!(repo.query_expired("cache", Utc::now()).await.is_err());
        assert!(repo.query_sorted_by_last_accessed("cache", 1).await.is_ok());
    }
}
