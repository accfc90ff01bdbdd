//! Record and statistics types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata row describing one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileRecord {
    pub id: String,
    pub store_id: String,
    /// External locator this entry is a copy of
    pub resource: String,
    /// Path relative to the store root; empty until the file is materialized
    pub file_location: String,
    /// Byte length, `None` while unknown
    pub size: Option<i64>,
    pub time_stored: Option<DateTime<Utc>>,
    pub time_last_accessed: Option<DateTime<Utc>>,
    pub timeout: Option<DateTime<Utc>>,
}

impl StoredFileRecord {
    /// A fresh, not yet persisted record with a random id
    pub fn new(store_id: &str, resource: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            store_id: store_id.to_string(),
            resource: resource.to_string(),
            file_location: String::new(),
            size: None,
            time_stored: None,
            time_last_accessed: None,
            timeout: None,
        }
    }

    /// Whether the record is still valid at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.timeout.map_or(true, |timeout| now < timeout)
    }

    /// Back-fill timestamps that were never set
    pub fn fill_defaults(&mut self, now: DateTime<Utc>) {
        self.time_stored.get_or_insert(now);
        self.time_last_accessed.get_or_insert(now);
    }
}

/// Outcome of one maintenance sweep over a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    /// Entries removed because their timeout elapsed
    pub expired: u64,
    /// Entries removed to bring the store back under its quota
    pub evicted: u64,
    pub reclaimed_bytes: u64,
    /// Whether the metadata store was asked to compact
    pub optimized: bool,
}

impl SweepStats {
    pub fn entries_deleted(&self) -> u64 {
        self.expired + self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_record_id_is_hex() {
        let record = StoredFileRecord::new("cache", "https://example.com/a.png");
        assert_eq!(record.id.len(), 32);
        assert!(record.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(record.file_location.is_empty());
        assert!(record.size.is_none());
    }

    #[test]
    fn test_record_ids_are_unique() {
        let a = StoredFileRecord::new("cache", "r");
        let b = StoredFileRecord::new("cache", "r");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_validity_boundary() {
        let now = Utc::now();
        let mut record = StoredFileRecord::new("cache", "r");
        assert!(record.is_valid_at(now));

        record.timeout = Some(now + Duration::seconds(10));
        assert!(record.is_valid_at(now));
        assert!(!record.is_valid_at(now + Duration::seconds(10)));
        assert!(!record.is_valid_at(now + Duration::seconds(11)));
    }

    #[test]
    fn test_fill_defaults_keeps_existing_values() {
        let earlier = Utc::now() - Duration::hours(1);
        let now = Utc::now();
        let mut record = StoredFileRecord::new("cache", "r");
        record.time_stored = Some(earlier);
        record.fill_defaults(now);
        assert_eq!(record.time_stored, Some(earlier));
        assert_eq!(record.time_last_accessed, Some(now));
    }

    #[test]
    fn test_sweep_stats_default() {
        let stats = SweepStats::default();
        assert_eq!(stats.entries_deleted(), 0);
        assert!(!stats.optimized);
    }
}
