//! Expiry and quota maintenance
//!
//! A sweep over one store first deletes every expired entry, then evicts the
//! least recently accessed entries until the store is back under its quota.
//! Deletes run in batches, one metadata transaction per batch, and files are
//! only unlinked after their batch committed.

use crate::config::{StoreConfig, StoreDefaults};
use crate::error::Result;
use crate::storage;
use crate::store::FileStore;
use crate::types::{StoredFileRecord, SweepStats};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Records deleted per metadata transaction
pub const EVICTION_BATCH_SIZE: u32 = 100;

#[derive(Debug, Default)]
struct BatchOutcome {
    deleted: u64,
    reclaimed: u64,
}

pub struct Maintenance {
    store: FileStore,
}

impl Maintenance {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    /// Sweep `store_id` using the built-in defaults for that id
    pub async fn run(&self, store_id: &str) -> Result<SweepStats> {
        self.run_with_defaults(store_id, &StoreDefaults::for_store_id(store_id))
            .await
    }

    pub async fn run_with_defaults(
        &self,
        store_id: &str,
        defaults: &StoreDefaults,
    ) -> Result<SweepStats> {
        let config = self.store.store_config(store_id, defaults)?;
        let mut stats = SweepStats::default();

        let expired = self.delete_expired(&config).await?;
        stats.expired = expired.deleted;
        stats.reclaimed_bytes = expired.reclaimed;

        if let Some(quota) = config.max_size_bytes() {
            let evicted = self.evict(&config, quota).await?;
            stats.evicted = evicted.deleted;
            stats.reclaimed_bytes += evicted.reclaimed;
        }

        if stats.entries_deleted() > 0 {
            match self.store.repository().optimize(store_id).await {
                Ok(()) => stats.optimized = true,
                Err(e) => warn!(store_id, error = %e, "Failed to optimize metadata"),
            }
        }

        info!(
            store_id,
            expired = stats.expired,
            evicted = stats.evicted,
            reclaimed_bytes = stats.reclaimed_bytes,
            "Store maintenance finished"
        );
        Ok(stats)
    }

    /// Evict least recently accessed entries of `store_id` until its known
    /// sizes add up to at most `quota_bytes`. Expired entries are left alone.
    pub async fn evict_to_quota(&self, store_id: &str, quota_bytes: u64) -> Result<SweepStats> {
        let config = self
            .store
            .store_config(store_id, &StoreDefaults::for_store_id(store_id))?;
        let outcome = self.evict(&config, quota_bytes).await?;

        Ok(SweepStats {
            evicted: outcome.deleted,
            reclaimed_bytes: outcome.reclaimed,
            ..Default::default()
        })
    }

    async fn delete_expired(&self, config: &StoreConfig) -> Result<BatchOutcome> {
        let expired = self
            .store
            .repository()
            .query_expired(&config.store_id, Utc::now())
            .await?;

        let mut total = BatchOutcome::default();
        for batch in expired.chunks(EVICTION_BATCH_SIZE as usize) {
            let outcome = self.delete_batch(config, batch, None).await?;
            total.deleted += outcome.deleted;
            total.reclaimed += outcome.reclaimed;
        }

        if total.deleted > 0 {
            debug!(store_id = %config.store_id, deleted = total.deleted, "Deleted expired entries");
        }
        Ok(total)
    }

    async fn evict(&self, config: &StoreConfig, quota: u64) -> Result<BatchOutcome> {
        let repository = self.store.repository();
        let used = repository.sum_size(&config.store_id).await?;
        let mut total = BatchOutcome::default();

        if used <= quota {
            return Ok(total);
        }

        let deficit = used - quota;
        debug!(store_id = %config.store_id, used, quota, deficit, "Store over quota");

        while total.reclaimed < deficit {
            let batch = repository
                .query_sorted_by_last_accessed(&config.store_id, EVICTION_BATCH_SIZE)
                .await?;
            if batch.is_empty() {
                break;
            }

            let outcome = self
                .delete_batch(config, &batch, Some(deficit - total.reclaimed))
                .await?;
            if outcome.deleted == 0 {
                warn!(
                    store_id = %config.store_id,
                    remaining = deficit - total.reclaimed,
                    "Eviction made no progress, giving up"
                );
                break;
            }

            total.deleted += outcome.deleted;
            total.reclaimed += outcome.reclaimed;
        }

        Ok(total)
    }

    /// Delete `records` in one transaction, stopping once `deficit` bytes are
    /// reclaimed. A failing record is skipped.
    async fn delete_batch(
        &self,
        config: &StoreConfig,
        records: &[StoredFileRecord],
        deficit: Option<u64>,
    ) -> Result<BatchOutcome> {
        let mut tx = self.store.repository().begin().await?;
        let mut outcome = BatchOutcome::default();
        let mut removed = Vec::new();

        for record in records {
            if deficit.is_some_and(|deficit| outcome.reclaimed >= deficit) {
                break;
            }

            match tx.delete(&record.id).await {
                Ok(true) => {
                    outcome.deleted += 1;
                    outcome.reclaimed += record.size.unwrap_or(0).max(0) as u64;
                    removed.push(record);
                }
                Ok(false) => debug!(id = %record.id, "Entry already gone"),
                Err(e) => warn!(id = %record.id, error = %e, "Failed to delete entry"),
            }
        }

        tx.commit().await?;

        for record in removed {
            if record.file_location.is_empty() {
                continue;
            }
            let path = match storage::resolve_location(&config.root_path, &record.file_location) {
                Ok(path) => path,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Not unlinking entry");
                    continue;
                }
            };
            if let Err(e) = storage::remove_stored_file(&path).await {
                warn!(id = %record.id, path = ?path, error = %e, "Failed to unlink stored file");
            }
        }

        Ok(outcome)
    }
}
