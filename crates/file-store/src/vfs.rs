//! Virtual filesystem surface
//!
//! Stored files are addressed as `x-file-store:///{id}`. [`CachedVfs`] keeps
//! cached copies of other sources and resolves resource URLs to them.

use crate::cache::CachedFile;
use crate::error::{FileStoreError, Result};
use crate::storage;
use crate::store::FileStore;
use crate::stored_file::StoredFile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use url::Url;

pub const VFS_SCHEME: &str = "x-file-store";

/// Bytes copied per read when caching a source
const COPY_CHUNK_SIZE: usize = 64 * 1024;

pub fn vfs_url(id: &str) -> String {
    format!("{}:///{}", VFS_SCHEME, id)
}

/// Extract the id from a `x-file-store:///{id}` URL. The id is empty for the
/// store root.
pub fn id_from_vfs_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| FileStoreError::NotFound(format!("VFS URL '{}' is invalid: {}", url, e)))?;

    if parsed.scheme() != VFS_SCHEME {
        return Err(FileStoreError::OperationUnsupported(format!(
            "URL scheme '{}' is not handled by the file store",
            parsed.scheme()
        )));
    }

    Ok(parsed.path().trim_start_matches('/').to_string())
}

/// Kinds of objects a VFS may be asked to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Directory,
}

/// A stored file seen through the VFS
#[derive(Debug)]
pub struct FileStoreObject {
    file: StoredFile,
}

impl FileStoreObject {
    /// Open an existing object
    pub async fn open(store: &FileStore, url: &str) -> Result<Self> {
        Ok(Self {
            file: StoredFile::open(store, url).await?,
        })
    }

    /// Create a new object. Only files exist in a file store. The resource
    /// recorded is the URL of the given id, or the object's own URL for the
    /// store root.
    pub fn new_object(store: &FileStore, kind: ObjectType, url: &str) -> Result<Self> {
        if kind != ObjectType::File {
            return Err(FileStoreError::OperationUnsupported(
                "File stores only contain files".to_string(),
            ));
        }

        let id = id_from_vfs_url(url)?;
        let mut file = StoredFile::create(store, url)?;
        let resource = if id.is_empty() {
            file.vfs_url()
        } else {
            vfs_url(&id)
        };
        file.set_resource(&resource);

        Ok(Self { file })
    }

    pub fn name(&self) -> &str {
        self.file.id()
    }

    pub fn uri(&self) -> String {
        self.file.vfs_url()
    }

    /// Listing a file store is not possible
    pub fn scan(&self) -> Result<Vec<String>> {
        Err(FileStoreError::OperationUnsupported(
            "File store objects can't be listed".to_string(),
        ))
    }

    pub async fn close(self) -> Result<()> {
        self.file.close().await
    }

    pub fn into_inner(self) -> StoredFile {
        self.file
    }
}

impl Deref for FileStoreObject {
    type Target = StoredFile;

    fn deref(&self) -> &StoredFile {
        &self.file
    }
}

impl DerefMut for FileStoreObject {
    fn deref_mut(&mut self) -> &mut StoredFile {
        &mut self.file
    }
}

/// Anything that can be copied into the cache
#[async_trait]
pub trait VfsSource: Send + Sync {
    async fn is_file(&self) -> Result<bool>;

    /// When the source content last changed, if known
    async fn time_updated(&self) -> Result<Option<DateTime<Utc>>>;

    /// Read up to `n` bytes, an empty result means EOF
    async fn read(&mut self, n: usize) -> Result<Vec<u8>>;
}

/// A file on the local filesystem, given as a path or `file://` URL
#[derive(Debug)]
pub struct LocalFileSource {
    path: PathBuf,
    file: Option<File>,
}

impl LocalFileSource {
    pub fn new(location: &str) -> Self {
        let path = Url::parse(location)
            .ok()
            .filter(|url| url.scheme() == "file")
            .and_then(|url| url.to_file_path().ok())
            .unwrap_or_else(|| PathBuf::from(location));

        Self { path, file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VfsSource for LocalFileSource {
    async fn is_file(&self) -> Result<bool> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn time_updated(&self) -> Result<Option<DateTime<Utc>>> {
        let modified = fs::metadata(&self.path).await?.modified()?;
        Ok(Some(DateTime::<Utc>::from(modified)))
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    FileStoreError::NotFound(format!("'{}'", self.path.display()))
                }
                _ => e.into(),
            })?,
        };
        let file = self.file.insert(file);

        let mut buf = Vec::new();
        file.take(n as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait]
impl VfsSource for StoredFile {
    async fn is_file(&self) -> Result<bool> {
        Ok(true)
    }

    async fn time_updated(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.time_stored())
    }

    async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        StoredFile::read(self, n).await
    }
}

/// Caching layer in front of other sources
#[derive(Debug, Clone)]
pub struct CachedVfs {
    store: FileStore,
}

impl CachedVfs {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    /// Copy `source` into the cache as the copy of `url`, replacing any
    /// previous copy. Returns the VFS URL of the cached file.
    pub async fn store_cached(
        &self,
        url: &str,
        source: &mut dyn VfsSource,
        timeout: Option<DateTime<Utc>>,
    ) -> Result<String> {
        if !source.is_file().await? {
            return Err(FileStoreError::OperationUnsupported(format!(
                "'{}' is not a file and can't be cached",
                url
            )));
        }

        let mut cached = self.cache_entry(url).await?;
        if let Err(e) = copy_into(&mut cached, source).await {
            if let Err(cleanup) = cached.delete().await {
                warn!(url, error = %cleanup, "Failed to remove partial cache entry");
            }
            return Err(e);
        }

        cached.set_timeout(timeout);
        let cached_url = cached.vfs_url();
        let id = cached.id().to_string();
        let path = cached.get_path_name().await?;
        if let Err(e) = cached.close().await {
            self.discard_entry(&id, &path).await;
            return Err(e);
        }

        debug!(url, cached_url = %cached_url, "Stored cached copy");
        Ok(cached_url)
    }

    /// Best effort removal of an entry whose save failed
    async fn discard_entry(&self, id: &str, path: &Path) {
        if let Err(e) = self.store.repository().delete(id).await {
            warn!(id, error = %e, "Failed to remove cache entry metadata");
        }
        if let Err(e) = storage::remove_stored_file(path).await {
            warn!(id, path = ?path, error = %e, "Failed to remove cache entry file");
        }
    }

    /// Whether a valid cached copy of `url` is at least as new as `source`
    pub async fn is_cached_up_to_date(&self, url: &str, source: &dyn VfsSource) -> Result<bool> {
        let cached = match CachedFile::load_by_resource(&self.store, url).await {
            Ok(cached) => cached,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        Ok(match source.time_updated().await? {
            Some(updated) => cached.is_up_to_date(updated),
            None => true,
        })
    }

    /// Re-cache `url` from `source` unless the cached copy is current.
    /// Returns whether a new copy was stored.
    pub async fn refresh_if_changed(
        &self,
        url: &str,
        source: &mut dyn VfsSource,
        timeout: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if self.is_cached_up_to_date(url, &*source).await? {
            return Ok(false);
        }
        self.store_cached(url, source, timeout).await?;
        Ok(true)
    }

    /// URL to read `url` from: its cached copy if there is a valid one
    pub async fn resolve(&self, url: &str) -> Result<String> {
        match CachedFile::load_by_resource(&self.store, url).await {
            Ok(cached) => Ok(cached.vfs_url()),
            Err(e) if e.is_not_found() => Ok(url.to_string()),
            Err(e) => Err(e),
        }
    }

    /// Previous entry for `url` emptied and restamped, or a new one
    async fn cache_entry(&self, url: &str) -> Result<CachedFile> {
        if let Some(mut existing) = CachedFile::find_by_resource(&self.store, url).await? {
            match existing.truncate(0).await {
                Ok(()) => {
                    existing.seek(0).await?;
                    existing.restamp();
                    return Ok(existing);
                }
                // The file vanished under us, start over
                Err(e) if e.is_not_found() => {
                    existing.delete().await?;
                }
                Err(e) => return Err(e),
            }
        }

        CachedFile::create(&self.store, url)
    }
}

async fn copy_into(cached: &mut CachedFile, source: &mut dyn VfsSource) -> Result<()> {
    loop {
        let chunk = source.read(COPY_CHUNK_SIZE).await?;
        if chunk.is_empty() {
            return Ok(());
        }
        cached.write(&chunk).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::memory::MemoryRepository;
    use crate::repository::MetadataRepository;
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_store(root: &Path) -> (FileStore, MemoryRepository) {
        let repo = MemoryRepository::new();
        let mut settings = Settings::default()
            .with_store("default", root.join("default"))
            .with_store("cache", root.join("cache"));
        settings.auto_maintenance = true;
        (FileStore::new(Arc::new(repo.clone()), settings), repo)
    }

    /// Source with a fixed modification time
    struct MemorySource {
        data: Vec<u8>,
        updated: Option<DateTime<Utc>>,
        position: usize,
    }

    impl MemorySource {
        fn new(data: &[u8], updated: Option<DateTime<Utc>>) -> Self {
            Self {
                data: data.to_vec(),
                updated,
                position: 0,
            }
        }
    }

    #[async_trait]
    impl VfsSource for MemorySource {
        async fn is_file(&self) -> Result<bool> {
            Ok(true)
        }

        async fn time_updated(&self) -> Result<Option<DateTime<Utc>>> {
            Ok(self.updated)
        }

        async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
            let end = (self.position + n).min(self.data.len());
            let chunk = self.data[self.position..end].to_vec();
            self.position = end;
            Ok(chunk)
        }
    }

    #[test]
    fn test_vfs_urls() {
        assert_eq!(vfs_url("abc"), "x-file-store:///abc");
        assert_eq!(id_from_vfs_url("x-file-store:///abc").unwrap(), "abc");
        assert_eq!(id_from_vfs_url("x-file-store:///").unwrap(), "");
        assert!(matches!(
            id_from_vfs_url("https://example.com/abc"),
            Err(FileStoreError::OperationUnsupported(_))
        ));
        assert!(id_from_vfs_url("not a url").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_new_object_and_open() {
        let dir = tempdir().unwrap();
        let (store, _repo) = test_store(dir.path());

        let mut object =
            FileStoreObject::new_object(&store, ObjectType::File, "x-file-store:///").unwrap();
        assert_eq!(object.resource(), object.uri());
        assert_eq!(object.uri(), format!("x-file-store:///{}", object.name()));
        object.write(b"object").await.unwrap();
        let uri = object.uri();
        object.close().await.unwrap();

        let mut opened = FileStoreObject::open(&store, &uri).await.unwrap();
        assert_eq!(opened.read(0).await.unwrap(), b"object");
        assert!(matches!(
            opened.scan(),
            Err(FileStoreError::OperationUnsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_directories_are_unsupported() {
        let dir = tempdir().unwrap();
        let (store, _repo) = test_store(dir.path());

        let err = FileStoreObject::new_object(&store, ObjectType::Directory, "x-file-store:///")
            .unwrap_err();
        assert!(matches!(err, FileStoreError::OperationUnsupported(_)));
    }

    #[tokio::test]
    async fn test_store_cached_local_file() {
        let dir = tempdir().unwrap();
        let (store, _repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store.clone());

        let source_path = dir.path().join("source.txt");
        std::fs::write(&source_path, b"local content").unwrap();
        let url = Url::from_file_path(&source_path).unwrap().to_string();

        assert_eq!(vfs.resolve(&url).await.unwrap(), url);

        let mut source = LocalFileSource::new(&url);
        assert_eq!(source.path(), source_path);
        let cached_url = vfs.store_cached(&url, &mut source, None).await.unwrap();

        assert_eq!(vfs.resolve(&url).await.unwrap(), cached_url);
        assert!(vfs
            .is_cached_up_to_date(&url, &LocalFileSource::new(&url))
            .await
            .unwrap());

        let mut cached = CachedFile::load_id(&store, &id_from_vfs_url(&cached_url).unwrap())
            .await
            .unwrap();
        assert_eq!(cached.read(0).await.unwrap(), b"local content");
    }

    #[tokio::test]
    async fn test_recaching_replaces_content_in_place() {
        let dir = tempdir().unwrap();
        let (store, repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store.clone());

        let first = vfs
            .store_cached("https://example.com/a", &mut MemorySource::new(b"first version", None), None)
            .await
            .unwrap();
        let second = vfs
            .store_cached("https://example.com/a", &mut MemorySource::new(b"second", None), None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.len().await, 1);

        let mut cached = CachedFile::load_by_resource(&store, "https://example.com/a")
            .await
            .unwrap();
        assert_eq!(cached.read(0).await.unwrap(), b"second");
        assert_eq!(cached.record().size, Some(6));
    }

    #[tokio::test]
    async fn test_up_to_date_follows_source_modification() {
        let dir = tempdir().unwrap();
        let (store, _repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store);
        let url = "https://example.com/data";

        let older = MemorySource::new(b"", Some(Utc::now() - Duration::hours(1)));
        assert!(!vfs.is_cached_up_to_date(url, &older).await.unwrap());

        let mut source = MemorySource::new(b"data", None);
        assert!(vfs
            .refresh_if_changed(url, &mut source, None)
            .await
            .unwrap());

        assert!(vfs.is_cached_up_to_date(url, &older).await.unwrap());
        let newer = MemorySource::new(b"", Some(Utc::now() + Duration::hours(1)));
        assert!(!vfs.is_cached_up_to_date(url, &newer).await.unwrap());

        let mut unchanged = MemorySource::new(b"data", Some(Utc::now() - Duration::hours(2)));
        assert!(!vfs
            .refresh_if_changed(url, &mut unchanged, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_copy_resolves_to_source() {
        let dir = tempdir().unwrap();
        let (store, _repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store);
        let url = "https://example.com/short-lived";

        vfs.store_cached(
            url,
            &mut MemorySource::new(b"x", None),
            Some(Utc::now() - Duration::seconds(1)),
        )
        .await
        .unwrap();

        assert_eq!(vfs.resolve(url).await.unwrap(), url);
        assert!(!vfs
            .is_cached_up_to_date(url, &MemorySource::new(b"", None))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_source_is_not_cached() {
        let dir = tempdir().unwrap();
        let (store, repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store);

        let missing = dir.path().join("missing");
        let mut source = LocalFileSource::new(missing.to_str().unwrap());
        let err = vfs
            .store_cached("file:///missing", &mut source, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FileStoreError::OperationUnsupported(_)));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_stored_file_as_source() {
        let dir = tempdir().unwrap();
        let (store, _repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store.clone());

        let mut original = StoredFile::create(&store, "original").unwrap();
        original.write(b"copy me").await.unwrap();
        original.save().await.unwrap();
        original.seek(0).await.unwrap();

        let cached_url = vfs
            .store_cached("original", &mut original, None)
            .await
            .unwrap();
        original.close().await.unwrap();

        let mut copy = CachedFile::load_id(&store, &id_from_vfs_url(&cached_url).unwrap())
            .await
            .unwrap();
        assert_eq!(copy.read(0).await.unwrap(), b"copy me");
        assert_ne!(copy.store_id(), "default");
    }

    #[tokio::test]
    async fn test_repository_sees_single_row_per_resource() {
        let dir = tempdir().unwrap();
        let (store, repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store);

        for _ in 0..3 {
            vfs.store_cached("r", &mut MemorySource::new(b"abc", None), None)
                .await
                .unwrap();
        }

        let record = repo.find_by_resource("cache", "r").await.unwrap().unwrap();
        assert_eq!(record.size, Some(3));
        assert_eq!(repo.len().await, 1);
    }

    /// Source that caches the same URL through another writer on first read
    struct ContendedSource {
        vfs: CachedVfs,
        url: String,
        inner: MemorySource,
        contended: bool,
    }

    #[async_trait]
    impl VfsSource for ContendedSource {
        async fn is_file(&self) -> Result<bool> {
            Ok(true)
        }

        async fn time_updated(&self) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
            if !self.contended {
                self.contended = true;
                self.vfs
                    .store_cached(&self.url, &mut MemorySource::new(b"winner", None), None)
                    .await?;
            }
            self.inner.read(n).await
        }
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
            .sum()
    }

    #[tokio::test]
    async fn test_failed_save_removes_cached_file() {
        let dir = tempdir().unwrap();
        let (store, repo) = test_store(dir.path());
        let vfs = CachedVfs::new(store.clone());
        let mut source = ContendedSource {
            vfs: CachedVfs::new(store.clone()),
            url: "https://example.com/contended".to_string(),
            inner: MemorySource::new(b"loser", None),
            contended: false,
        };

        let err = vfs
            .store_cached("https://example.com/contended", &mut source, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FileStoreError::Metadata(_)));

        assert_eq!(repo.len().await, 1);
        assert_eq!(count_files(&dir.path().join("cache")), 1);
        let mut winner = CachedFile::load_by_resource(&store, "https://example.com/contended")
            .await
            .unwrap();
        assert_eq!(winner.read(0).await.unwrap(), b"winner");
    }
}
