//! File store settings
//!
//! Settings are an explicit value handed to [`crate::FileStore`]. They can be
//! read from a JSON document or from `FILE_STORE_*` environment variables.

use crate::error::{FileStoreError, Result};
use crate::shard::MAX_SHARD_LENGTH;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_DIR_MODE: u32 = 0o750;
pub const DEFAULT_FILE_MODE: u32 = 0o640;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Built-in values a store falls back to when its settings leave them out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreDefaults {
    pub store_id: &'static str,
    /// Quota in megabytes, `-1` for unlimited
    pub max_size_mb: i64,
    pub shard_length: u32,
}

impl StoreDefaults {
    /// Generic stored files: unlimited, unsharded
    pub const STORED_FILE: StoreDefaults = StoreDefaults {
        store_id: "default",
        max_size_mb: -1,
        shard_length: 0,
    };

    /// Cached copies of external resources
    pub const CACHE: StoreDefaults = StoreDefaults {
        store_id: "cache",
        max_size_mb: 2048,
        shard_length: 4,
    };

    /// Defaults matching a store id, generic ones for unknown ids
    pub fn for_store_id(store_id: &str) -> StoreDefaults {
        if store_id == Self::CACHE.store_id {
            Self::CACHE
        } else {
            Self::STORED_FILE
        }
    }
}

/// Per-store settings as written in the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub max_size_mb: Option<i64>,
    #[serde(default, alias = "shard_length")]
    pub subdirectory_length: Option<u32>,
}

/// Global file store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub stores: HashMap<String, StoreSettings>,
    #[serde(default = "default_dir_mode", deserialize_with = "octal")]
    pub chmod_dirs: u32,
    #[serde(default = "default_file_mode", deserialize_with = "octal")]
    pub chmod_files: u32,
    #[serde(default, deserialize_with = "optional_octal")]
    pub umask: Option<u32>,
    /// An external scheduler runs maintenance; disables the self-trigger
    #[serde(default)]
    pub auto_maintenance: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stores: HashMap::new(),
            chmod_dirs: DEFAULT_DIR_MODE,
            chmod_files: DEFAULT_FILE_MODE,
            umask: None,
            auto_maintenance: false,
        }
    }
}

/// Resolved configuration of one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub store_id: String,
    pub root_path: PathBuf,
    /// Quota in megabytes; zero or negative means unlimited
    pub max_size_mb: i64,
    pub shard_length: u32,
    pub dir_mode: u32,
    pub file_mode: u32,
    pub umask: Option<u32>,
}

impl StoreConfig {
    /// Quota in bytes, `None` if the store is unlimited. Saturates at
    /// `u64::MAX`.
    pub fn max_size_bytes(&self) -> Option<u64> {
        (self.max_size_mb > 0).then(|| (self.max_size_mb as u64).saturating_mul(BYTES_PER_MB))
    }
}

impl Settings {
    /// Register a store rooted at `path`
    pub fn with_store(mut self, store_id: &str, path: impl Into<PathBuf>) -> Self {
        self.stores.insert(
            store_id.to_string(),
            StoreSettings {
                path: Some(path.into()),
                ..Default::default()
            },
        );
        self
    }

    /// Resolve the configuration of `store_id`, filling gaps from `defaults`
    pub fn store_config(&self, store_id: &str, defaults: &StoreDefaults) -> Result<StoreConfig> {
        let store = self.stores.get(store_id);

        let root_path = store.and_then(|s| s.path.clone()).ok_or_else(|| {
            FileStoreError::Configuration(format!(
                "File store directory has not been configured for ID '{}'",
                store_id
            ))
        })?;

        let shard_length = store
            .and_then(|s| s.subdirectory_length)
            .unwrap_or(defaults.shard_length);
        check_shard_length(store_id, shard_length)?;

        let max_size_mb = store
            .and_then(|s| s.max_size_mb)
            .unwrap_or(defaults.max_size_mb);
        check_max_size(store_id, max_size_mb)?;

        Ok(StoreConfig {
            store_id: store_id.to_string(),
            root_path,
            max_size_mb,
            shard_length,
            dir_mode: self.chmod_dirs,
            file_mode: self.chmod_files,
            umask: self.umask,
        })
    }

    /// Reject values that can never produce a usable store
    pub fn validate(&self) -> Result<()> {
        for (store_id, store) in &self.stores {
            if let Some(length) = store.subdirectory_length {
                check_shard_length(store_id, length)?;
            }
            if let Some(max_size_mb) = store.max_size_mb {
                check_max_size(store_id, max_size_mb)?;
            }
        }
        Ok(())
    }

    /// Read settings from a JSON document
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            FileStoreError::Configuration(format!(
                "Failed to read settings file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(data)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from `FILE_STORE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Settings::default();

        let ids = lookup("FILE_STORE_IDS").unwrap_or_else(|| "default,cache".to_string());
        for store_id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let prefix = format!("FILE_STORE_{}", store_id.to_uppercase().replace('-', "_"));

            let Some(path) = lookup(&format!("{}_PATH", prefix)) else {
                continue;
            };

            let max_size_mb = lookup(&format!("{}_MAX_MB", prefix))
                .map(|v| parse_number::<i64>(&format!("{}_MAX_MB", prefix), &v))
                .transpose()?;
            let subdirectory_length = lookup(&format!("{}_SUBDIRECTORY_LENGTH", prefix))
                .map(|v| parse_number::<u32>(&format!("{}_SUBDIRECTORY_LENGTH", prefix), &v))
                .transpose()?;

            settings.stores.insert(
                store_id.to_string(),
                StoreSettings {
                    path: Some(PathBuf::from(path)),
                    max_size_mb,
                    subdirectory_length,
                },
            );
        }

        if let Some(mode) = lookup("FILE_STORE_CHMOD_DIRS") {
            settings.chmod_dirs = parse_octal(&mode).map_err(FileStoreError::Configuration)?;
        }
        if let Some(mode) = lookup("FILE_STORE_CHMOD_FILES") {
            settings.chmod_files = parse_octal(&mode).map_err(FileStoreError::Configuration)?;
        }
        if let Some(mask) = lookup("FILE_STORE_UMASK") {
            settings.umask = Some(parse_octal(&mask).map_err(FileStoreError::Configuration)?);
        }
        settings.auto_maintenance = lookup("FILE_STORE_AUTO_MAINTENANCE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        settings.validate()?;
        Ok(settings)
    }
}

fn check_shard_length(store_id: &str, length: u32) -> Result<()> {
    if length > MAX_SHARD_LENGTH {
        return Err(FileStoreError::Configuration(format!(
            "File store subdirectory length {} is invalid for ID '{}'",
            length, store_id
        )));
    }
    Ok(())
}

fn check_max_size(store_id: &str, max_size_mb: i64) -> Result<()> {
    if max_size_mb > 0 && (max_size_mb as u64).checked_mul(BYTES_PER_MB).is_none() {
        return Err(FileStoreError::Configuration(format!(
            "File store size limit {} MB is too large for ID '{}'",
            max_size_mb, store_id
        )));
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FileStoreError::Configuration(format!("Invalid value for {}: {}", key, value)))
}

fn parse_octal(value: &str) -> std::result::Result<u32, String> {
    let digits = value.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|_| format!("Invalid octal mode: {}", value))
}

fn default_dir_mode() -> u32 {
    DEFAULT_DIR_MODE
}

fn default_file_mode() -> u32 {
    DEFAULT_FILE_MODE
}

/// Modes are written as octal strings ("0750"); bare integers are taken as-is
#[derive(Deserialize)]
#[serde(untagged)]
enum Mode {
    Text(String),
    Number(u32),
}

fn octal<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    match Mode::deserialize(deserializer)? {
        Mode::Text(text) => parse_octal(&text).map_err(serde::de::Error::custom),
        Mode::Number(value) => Ok(value),
    }
}

fn optional_octal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error> {
    match Option::<Mode>::deserialize(deserializer)? {
        Some(Mode::Text(text)) => parse_octal(&text).map(Some).map_err(serde::de::Error::custom),
        Some(Mode::Number(value)) => Ok(Some(value)),
        None => Ok(None),
    }
}
