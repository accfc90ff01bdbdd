//! Filesystem side of a store: directories, file handles and unlinking

use crate::config::StoreConfig;
use crate::error::{FileStoreError, Result};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{access, AccessFlags};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, DirBuilder, File, OpenOptions};
use tracing::debug;

/// Set the process umask before creating anything, if one is configured
fn apply_umask(config: &StoreConfig) {
    if let Some(mask) = config.umask {
        umask(Mode::from_bits_truncate(mask as nix::libc::mode_t));
    }
}

fn is_writable(path: &Path) -> bool {
    access(path, AccessFlags::W_OK).is_ok()
}

/// Make sure `path` is a writable directory, creating it if it is missing
pub(crate) async fn ensure_writable_dir(path: &Path, config: &StoreConfig) -> Result<()> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() && is_writable(path) => Ok(()),
        Ok(_) => Err(FileStoreError::StorageUnavailable(format!(
            "File store directory '{}' not writable",
            path.display()
        ))),
        Err(e) if e.kind() == ErrorKind::NotFound => create_writable_directory(path, config).await,
        Err(e) => Err(FileStoreError::StorageUnavailable(format!(
            "File store directory '{}' not accessible: {}",
            path.display(),
            e
        ))),
    }
}

/// Create a single directory with the configured mode
pub(crate) async fn create_writable_directory(path: &Path, config: &StoreConfig) -> Result<()> {
    apply_umask(config);

    let created = match DirBuilder::new().mode(config.dir_mode).create(path).await {
        Ok(()) => true,
        // Another writer won the race
        Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
        Err(e) => {
            return Err(FileStoreError::StorageUnavailable(format!(
                "Failed to create file store directory '{}': {}",
                path.display(),
                e
            )))
        }
    };

    let is_dir = fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false);
    if !is_dir || !is_writable(path) {
        return Err(FileStoreError::StorageUnavailable(format!(
            "Failed to create file store directory '{}'",
            path.display()
        )));
    }

    if created {
        debug!(path = ?path, mode = %format!("{:o}", config.dir_mode), "Created store directory");
    }
    Ok(())
}

/// Join a persisted location onto the store root, refusing anything that
/// could leave the root
pub(crate) fn resolve_location(root: &Path, location: &str) -> Result<PathBuf> {
    let relative = Path::new(location);
    let safe = !location.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if !safe {
        return Err(FileStoreError::StorageUnavailable(format!(
            "Invalid file location '{}'",
            location
        )));
    }

    Ok(root.join(relative.components().collect::<PathBuf>()))
}

/// Create (or truncate) a stored file for reading and writing
pub(crate) async fn open_new_file(path: &Path, config: &StoreConfig) -> Result<File> {
    apply_umask(config);

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(config.file_mode)
        .open(path)
        .await
        .map_err(|e| {
            FileStoreError::StorageUnavailable(format!(
                "Failed to create stored file '{}': {}",
                path.display(),
                e
            ))
        })
}

/// Open an existing stored file; a vanished file is reported as not found
pub(crate) async fn open_existing_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                FileStoreError::NotFound(format!("Stored file '{}' is gone", path.display()))
            }
            _ => FileStoreError::StorageUnavailable(format!(
                "Failed to open stored file '{}': {}",
                path.display(),
                e
            )),
        })
}

/// Length of a stored file on disk; a vanished file is reported as not found
pub(crate) async fn stored_file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(FileStoreError::NotFound(format!(
            "Stored file '{}' is gone",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Unlink a stored file. Returns whether a file was actually removed.
pub(crate) async fn remove_stored_file(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = ?path, "Deleted stored file");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
