//! Cached copies of external resources
//!
//! A [`CachedFile`] is a [`StoredFile`] living in the `cache` store, which is
//! size limited and sharded by default.

use crate::config::StoreDefaults;
use crate::error::Result;
use crate::store::FileStore;
use crate::stored_file::StoredFile;
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
pub struct CachedFile(StoredFile);

impl CachedFile {
    pub fn create(store: &FileStore, resource: &str) -> Result<Self> {
        StoredFile::create_in(store, StoreDefaults::CACHE, resource).map(Self)
    }

    pub async fn load_id(store: &FileStore, id: &str) -> Result<Self> {
        StoredFile::load_id_in(store, StoreDefaults::CACHE, id)
            .await
            .map(Self)
    }

    /// Load the valid cached copy of `resource`. Expired copies are reported
    /// as not found.
    pub async fn load_by_resource(store: &FileStore, resource: &str) -> Result<Self> {
        StoredFile::load_resource_in(store, StoreDefaults::CACHE, resource)
            .await
            .map(Self)
    }

    /// Cached copy of `resource` regardless of its timeout
    pub(crate) async fn find_by_resource(store: &FileStore, resource: &str) -> Result<Option<Self>> {
        Ok(StoredFile::find_resource_in(store, StoreDefaults::CACHE, resource)
            .await?
            .map(Self))
    }

    pub async fn close(self) -> Result<()> {
        self.0.close().await
    }

    pub async fn delete(self) -> Result<bool> {
        self.0.delete().await
    }

    pub fn into_inner(self) -> StoredFile {
        self.0
    }
}

impl Deref for CachedFile {
    type Target = StoredFile;

    fn deref(&self) -> &StoredFile {
        &self.0
    }
}

impl DerefMut for CachedFile {
    fn deref_mut(&mut self) -> &mut StoredFile {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::memory::MemoryRepository;
    use chrono::{Duration, Utc};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_store(root: &Path) -> FileStore {
        let mut settings = Settings::default().with_store("cache", root.join("cache"));
        settings.auto_maintenance = true;
        FileStore::new(Arc::new(MemoryRepository::new()), settings)
    }

    #[tokio::test]
    async fn test_cached_file_lives_in_cache_store() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let mut cached = CachedFile::create(&store, "https://example.com/").unwrap();
        cached.write(b"cached").await.unwrap();
        let id = cached.id().to_string();
        assert_eq!(cached.store_id(), "cache");

        // Sharded by the first four characters of the id
        let path = cached.get_path_name().await.unwrap();
        assert_eq!(
            path,
            std::path::absolute(dir.path().join("cache").join(&id[..4]).join(&id[4..])).unwrap()
        );
        cached.close().await.unwrap();

        let mut loaded = CachedFile::load_by_resource(&store, "https://example.com/")
            .await
            .unwrap();
        assert_eq!(loaded.id(), id);
        assert_eq!(loaded.read(0).await.unwrap(), b"cached");
    }

    #[tokio::test]
    async fn test_expired_copy_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let mut cached = CachedFile::create(&store, "r").unwrap();
        cached.write(b"old").await.unwrap();
        cached.set_timeout(Some(Utc::now() - Duration::minutes(1)));
        cached.close().await.unwrap();

        let err = CachedFile::load_by_resource(&store, "r").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(CachedFile::find_by_resource(&store, "r")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_rewrite_clears_size_until_close() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let mut cached = CachedFile::create(&store, "https://example.com/doc").unwrap();
        cached.write(b"first").await.unwrap();
        cached.close().await.unwrap();

        let mut cached = CachedFile::load_by_resource(&store, "https://example.com/doc")
            .await
            .unwrap();
        assert_eq!(cached.record().size, Some(5));
        cached.truncate(0).await.unwrap();
        cached.write(b"second version").await.unwrap();
        assert_eq!(cached.record().size, None);
        cached.close().await.unwrap();

        let mut latest = CachedFile::load_by_resource(&store, "https://example.com/doc")
            .await
            .unwrap();
        assert_eq!(latest.record().size, Some(14));
        assert_eq!(latest.read(0).await.unwrap(), b"second version");
    }

    #[tokio::test]
    async fn test_missing_cache_store_configuration() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default().with_store("default", dir.path());
        settings.auto_maintenance = true;
        let store = FileStore::new(Arc::new(MemoryRepository::new()), settings);

        let err = CachedFile::create(&store, "r").unwrap_err();
        assert!(matches!(err, crate::FileStoreError::Configuration(_)));
    }
}
