use chrono::{DateTime, Utc};
use file_store::StoredFileRecord;
use sqlx::FromRow;

/// Row of the `stored_files` table
#[derive(Debug, Clone, FromRow)]
pub struct StoredFileRow {
    pub id: String,
    pub store_id: String,
    pub resource: String,
    pub file_location: String,
    pub size: Option<i64>,
    pub time_stored: DateTime<Utc>,
    pub time_last_accessed: DateTime<Utc>,
    pub timeout: Option<DateTime<Utc>>,
}

impl From<StoredFileRow> for StoredFileRecord {
    fn from(row: StoredFileRow) -> Self {
        StoredFileRecord {
            id: row.id,
            store_id: row.store_id,
            resource: row.resource,
            file_location: row.file_location,
            size: row.size,
            time_stored: Some(row.time_stored),
            time_last_accessed: Some(row.time_last_accessed),
            timeout: row.timeout,
        }
    }
}
