//! Shared handle on metadata and settings

use crate::config::{Settings, StoreConfig, StoreDefaults};
use crate::error::Result;
use crate::maintenance::Maintenance;
use crate::repository::MetadataRepository;
use std::fmt;
use std::sync::Arc;

/// One in this many handle opens runs a maintenance sweep when automatic
/// maintenance is disabled
pub const DEFAULT_SELF_MAINTENANCE_ODDS: u32 = 30;

/// Everything a stored file needs besides its own record: the metadata
/// repository and the settings. Cheap to clone.
#[derive(Clone)]
pub struct FileStore {
    repository: Arc<dyn MetadataRepository>,
    settings: Arc<Settings>,
    self_maintenance_odds: u32,
}

impl FileStore {
    pub fn new(repository: Arc<dyn MetadataRepository>, settings: Settings) -> Self {
        Self {
            repository,
            settings: Arc::new(settings),
            self_maintenance_odds: DEFAULT_SELF_MAINTENANCE_ODDS,
        }
    }

    /// Run the self-triggered sweep on one in `odds` handle opens. 1 sweeps
    /// on every open.
    pub fn with_self_maintenance_odds(mut self, odds: u32) -> Self {
        self.self_maintenance_odds = odds.max(1);
        self
    }

    pub fn repository(&self) -> &Arc<dyn MetadataRepository> {
        &self.repository
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn self_maintenance_odds(&self) -> u32 {
        self.self_maintenance_odds
    }

    /// Resolved configuration of `store_id`
    pub fn store_config(&self, store_id: &str, defaults: &StoreDefaults) -> Result<StoreConfig> {
        self.settings.store_config(store_id, defaults)
    }

    /// Maintenance sweeps over this store's metadata and files
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(self.clone())
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore")
            .field("settings", &self.settings)
            .field("self_maintenance_odds", &self.self_maintenance_odds)
            .finish_non_exhaustive()
    }
}
