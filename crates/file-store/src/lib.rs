//! Metadata-backed file store with TTL expiration and LRU eviction
//!
//! Files live under per-store root directories, optionally sharded into
//! subdirectories. Their metadata (resource, size, timestamps, timeout) lives
//! behind a [`MetadataRepository`]. A maintenance sweep removes expired
//! entries and evicts the least recently accessed ones once a store exceeds
//! its quota.

mod cache;
mod config;
mod error;
mod maintenance;
mod memory;
mod repository;
mod shard;
mod storage;
mod store;
mod stored_file;
mod types;
pub mod vfs;

pub use cache::CachedFile;
pub use config::{
    Settings, StoreConfig, StoreDefaults, StoreSettings, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
};
pub use error::{FileStoreError, Result};
pub use maintenance::{Maintenance, EVICTION_BATCH_SIZE};
pub use memory::MemoryRepository;
pub use repository::{MetadataRepository, RepositoryTransaction};
pub use shard::{file_name_for, sanitize_file_name, shard, ShardedName, MAX_SHARD_LENGTH};
pub use store::{FileStore, DEFAULT_SELF_MAINTENANCE_ODDS};
pub use stored_file::StoredFile;
pub use types::{StoredFileRecord, SweepStats};
pub use vfs::{CachedVfs, FileStoreObject, LocalFileSource, ObjectType, VfsSource};
