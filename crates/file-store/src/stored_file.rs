//! A single stored file: metadata record plus its on-disk content
//!
//! The file on disk is created lazily on first I/O. Metadata changes are
//! only persisted by [`StoredFile::save`] or [`StoredFile::close`].

use crate::config::{StoreConfig, StoreDefaults};
use crate::error::{FileStoreError, Result};
use crate::shard;
use crate::storage;
use crate::store::FileStore;
use crate::types::StoredFileRecord;
use crate::vfs;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

pub struct StoredFile {
    store: FileStore,
    defaults: StoreDefaults,
    config: StoreConfig,
    record: StoredFileRecord,
    handle: Option<File>,
    modified: bool,
}

impl StoredFile {
    /// New entry in the default store for `resource`. Nothing touches disk or
    /// metadata until the first I/O or save.
    pub fn create(store: &FileStore, resource: &str) -> Result<Self> {
        Self::create_in(store, StoreDefaults::STORED_FILE, resource)
    }

    /// Load a valid entry by id
    pub async fn load_id(store: &FileStore, id: &str) -> Result<Self> {
        Self::load_id_in(store, StoreDefaults::STORED_FILE, id).await
    }

    /// Load the valid entry caching `resource` in the default store
    pub async fn load_resource(store: &FileStore, resource: &str) -> Result<Self> {
        Self::load_resource_in(store, StoreDefaults::STORED_FILE, resource).await
    }

    /// Load the entry addressed by a `x-file-store:///{id}` URL
    pub async fn open(store: &FileStore, url: &str) -> Result<Self> {
        let id = vfs::id_from_vfs_url(url)?;
        if id.is_empty() {
            return Err(FileStoreError::NotFound(format!("VFS URL '{}' is invalid", url)));
        }
        Self::load_id(store, &id).await
    }

    pub(crate) fn create_in(
        store: &FileStore,
        defaults: StoreDefaults,
        resource: &str,
    ) -> Result<Self> {
        if resource.is_empty() {
            return Err(FileStoreError::StorageUnavailable(
                "Can't create a stored file without a resource".to_string(),
            ));
        }

        let record = StoredFileRecord::new(defaults.store_id, resource);
        let config = store.store_config(defaults.store_id, &defaults)?;

        Ok(Self {
            store: store.clone(),
            defaults,
            config,
            record,
            handle: None,
            modified: true,
        })
    }

    pub(crate) async fn load_id_in(
        store: &FileStore,
        defaults: StoreDefaults,
        id: &str,
    ) -> Result<Self> {
        let record = store
            .repository()
            .find_by_id(id)
            .await?
            .filter(|r| r.is_valid_at(Utc::now()))
            .ok_or_else(|| FileStoreError::NotFound(format!("Stored file '{}'", id)))?;

        Self::from_record(store, defaults, record)
    }

    pub(crate) async fn load_resource_in(
        store: &FileStore,
        defaults: StoreDefaults,
        resource: &str,
    ) -> Result<Self> {
        Self::find_resource_in(store, defaults, resource)
            .await?
            .filter(StoredFile::is_valid)
            .ok_or_else(|| {
                FileStoreError::NotFound(format!("Stored file for resource '{}'", resource))
            })
    }

    /// Entry for `resource`, valid or not
    pub(crate) async fn find_resource_in(
        store: &FileStore,
        defaults: StoreDefaults,
        resource: &str,
    ) -> Result<Option<Self>> {
        store
            .repository()
            .find_by_resource(defaults.store_id, resource)
            .await?
            .map(|record| Self::from_record(store, defaults, record))
            .transpose()
    }

    fn from_record(
        store: &FileStore,
        defaults: StoreDefaults,
        mut record: StoredFileRecord,
    ) -> Result<Self> {
        let config = store.store_config(&record.store_id, &defaults)?;
        // Only persisted by a later save
        record.time_last_accessed = Some(Utc::now());

        Ok(Self {
            store: store.clone(),
            defaults,
            config,
            record,
            handle: None,
            modified: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn store_id(&self) -> &str {
        &self.record.store_id
    }

    pub fn resource(&self) -> &str {
        &self.record.resource
    }

    pub fn record(&self) -> &StoredFileRecord {
        &self.record
    }

    pub fn timeout(&self) -> Option<DateTime<Utc>> {
        self.record.timeout
    }

    pub fn time_stored(&self) -> Option<DateTime<Utc>> {
        self.record.time_stored
    }

    /// `x-file-store:///{id}` address of this entry
    pub fn vfs_url(&self) -> String {
        vfs::vfs_url(&self.record.id)
    }

    pub fn set_resource(&mut self, resource: &str) {
        self.record.resource = resource.to_string();
        self.modified = true;
    }

    pub fn set_timeout(&mut self, timeout: Option<DateTime<Utc>>) {
        self.record.timeout = timeout;
        self.modified = true;
    }

    /// Move the entry to another store. Only possible before its file exists.
    pub fn set_store_id(&mut self, store_id: &str) -> Result<()> {
        if self.handle.is_some() || !self.record.file_location.is_empty() {
            return Err(FileStoreError::OperationUnsupported(format!(
                "Stored file '{}' already exists on disk and can't change stores",
                self.record.id
            )));
        }

        self.config = self.store.store_config(store_id, &self.defaults)?;
        self.record.store_id = store_id.to_string();
        self.modified = true;
        Ok(())
    }

    /// Whether the entry has not timed out yet
    pub fn is_valid(&self) -> bool {
        self.record.is_valid_at(Utc::now())
    }

    /// Whether the content was stored at or after `updated`
    pub fn is_up_to_date(&self, updated: DateTime<Utc>) -> bool {
        self.record.time_stored.is_some_and(|stored| stored >= updated)
    }

    /// Mark the content as freshly stored
    pub(crate) fn restamp(&mut self) {
        self.record.time_stored = Some(Utc::now());
        self.modified = true;
    }

    /// Read up to `n` bytes, or everything up to EOF when `n` is 0
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let file = self.ensure_handle().await?;
        let mut buf = Vec::new();
        if n == 0 {
            file.read_to_end(&mut buf).await?;
        } else {
            file.take(n as u64).read_to_end(&mut buf).await?;
        }
        self.touch();
        Ok(buf)
    }

    /// Write all of `data`, returning the number of bytes written
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let file = self.ensure_handle().await?;
        file.write_all(data).await?;
        self.record.size = None;
        self.touch();
        Ok(data.len())
    }

    /// Move to an absolute offset
    pub async fn seek(&mut self, offset: u64) -> Result<u64> {
        let file = self.ensure_handle().await?;
        Ok(file.seek(SeekFrom::Start(offset)).await?)
    }

    pub async fn tell(&mut self) -> Result<u64> {
        let file = self.ensure_handle().await?;
        Ok(file.stream_position().await?)
    }

    /// Cut the content to `len` bytes without moving the position
    pub async fn truncate(&mut self, len: u64) -> Result<()> {
        let file = self.ensure_handle().await?;
        file.flush().await?;
        file.set_len(len).await?;
        self.record.size = None;
        self.touch();
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        let file = self.ensure_handle().await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn is_eof(&mut self) -> Result<bool> {
        let file = self.ensure_handle().await?;
        file.flush().await?;
        let position = file.stream_position().await?;
        let len = file.metadata().await?.len();
        Ok(position >= len)
    }

    /// Current content length in bytes
    pub async fn get_size(&mut self) -> Result<u64> {
        if let Some(file) = self.handle.as_mut() {
            file.flush().await?;
            return Ok(file.metadata().await?.len());
        }

        if let Some(size) = self.record.size {
            return Ok(size.max(0) as u64);
        }

        if self.record.file_location.is_empty() {
            return Ok(0);
        }

        let path = storage::resolve_location(&self.config.root_path, &self.record.file_location)?;
        storage::stored_file_len(&path).await
    }

    /// Absolute path of the file on disk, creating it if necessary
    pub async fn get_path_name(&mut self) -> Result<PathBuf> {
        self.ensure_handle().await?;
        let path = storage::resolve_location(&self.config.root_path, &self.record.file_location)?;
        Ok(std::path::absolute(path)?)
    }

    /// Persist the metadata record in its own transaction.
    ///
    /// Fails with [`FileStoreError::NotFound`] when the file is gone from
    /// disk, e.g. after a sweep evicted the entry while it was open. The
    /// evicted row is not put back.
    pub async fn save(&mut self) -> Result<()> {
        if let Some(file) = self.handle.as_mut() {
            file.flush().await?;
        }

        if self.record.size.is_none() && self.record.file_location.is_empty() {
            self.ensure_handle().await?;
        }
        if !self.record.file_location.is_empty() {
            let path =
                storage::resolve_location(&self.config.root_path, &self.record.file_location)?;
            let len = storage::stored_file_len(&path).await?;
            if self.record.size.is_none() {
                self.record.size = Some(len as i64);
            }
        }
        self.record.fill_defaults(Utc::now());

        let mut tx = self.store.repository().begin().await?;
        tx.save(&self.record).await?;
        tx.commit().await?;

        self.modified = false;
        debug!(
            id = %self.record.id,
            store_id = %self.record.store_id,
            size = ?self.record.size,
            "Saved stored file"
        );
        Ok(())
    }

    /// Save pending changes and release the handle
    pub async fn close(mut self) -> Result<()> {
        let result = if self.modified || self.handle.is_some() {
            self.save().await
        } else {
            Ok(())
        };
        self.handle = None;
        result
    }

    /// Remove the metadata record and unlink the file. Returns whether a
    /// record existed.
    pub async fn delete(mut self) -> Result<bool> {
        self.handle = None;
        self.modified = false;

        let mut tx = self.store.repository().begin().await?;
        let deleted = tx.delete(&self.record.id).await?;
        tx.commit().await?;

        if !self.record.file_location.is_empty() {
            let path =
                storage::resolve_location(&self.config.root_path, &self.record.file_location)?;
            storage::remove_stored_file(&path).await?;
        }

        debug!(id = %self.record.id, deleted, "Deleted stored file entry");
        Ok(deleted)
    }

    fn touch(&mut self) {
        self.record.time_last_accessed = Some(Utc::now());
        self.modified = true;
    }

    async fn ensure_handle(&mut self) -> Result<&mut File> {
        let file = match self.handle.take() {
            Some(file) => file,
            None => self.open_handle().await?,
        };
        Ok(self.handle.insert(file))
    }

    async fn open_handle(&mut self) -> Result<File> {
        self.maybe_run_maintenance().await;
        storage::ensure_writable_dir(&self.config.root_path, &self.config).await?;

        if self.record.file_location.is_empty() {
            return self.materialize().await;
        }

        let path = storage::resolve_location(&self.config.root_path, &self.record.file_location)?;
        storage::open_existing_file(&path).await
    }

    /// Pick the file name, create the shard directory and the empty file
    async fn materialize(&mut self) -> Result<File> {
        let name = shard::file_name_for(&self.record.id, &self.record.resource);
        let sharded = shard::shard(&name, self.config.shard_length);

        if let Some(subdirectory) = &sharded.subdirectory {
            let dir = self.config.root_path.join(subdirectory);
            storage::ensure_writable_dir(&dir, &self.config).await?;
        }

        let location = sharded.location();
        let path = storage::resolve_location(&self.config.root_path, &location)?;
        let file = storage::open_new_file(&path, &self.config).await?;

        debug!(id = %self.record.id, location = %location, "Created stored file");
        self.record.file_location = location;
        self.record.size = None;
        self.modified = true;
        Ok(file)
    }

    async fn maybe_run_maintenance(&self) {
        if self.store.settings().auto_maintenance {
            return;
        }
        let odds = self.store.self_maintenance_odds().max(1);
        let triggered = rand::thread_rng().gen_ratio(1, odds);
        if !triggered {
            return;
        }

        if let Err(e) = self
            .store
            .maintenance()
            .run_with_defaults(&self.config.store_id, &self.defaults)
            .await
        {
            warn!(store_id = %self.config.store_id, error = %e, "Store maintenance failed");
        }
    }
}

impl fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredFile")
            .field("record", &self.record)
            .field("root_path", &self.config.root_path)
            .field("open", &self.handle.is_some())
            .field("modified", &self.modified)
            .finish()
    }
}

impl Drop for StoredFile {
    fn drop(&mut self) {
        if self.handle.is_some() && self.modified {
            warn!(
                id = %self.record.id,
                "Stored file dropped without close, metadata changes are lost"
            );
        }
    }
}
