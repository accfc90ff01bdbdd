use crate::types::StoredFileRow;
use chrono::{DateTime, Utc};
use file_store::StoredFileRecord;
use sqlx::{PgExecutor, PgPool};

const COLUMNS: &str =
    "id, store_id, resource, file_location, size, time_stored, time_last_accessed, timeout";

/// Insert a record or overwrite the row with the same id. Missing timestamps
/// are filled with `now`.
pub async fn upsert(
    executor: impl PgExecutor<'_>,
    record: &StoredFileRecord,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stored_files
            (id, store_id, resource, file_location, size, time_stored, time_last_accessed, timeout)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            store_id = EXCLUDED.store_id,
            resource = EXCLUDED.resource,
            file_location = EXCLUDED.file_location,
            size = EXCLUDED.size,
            time_stored = EXCLUDED.time_stored,
            time_last_accessed = EXCLUDED.time_last_accessed,
            timeout = EXCLUDED.timeout
        "#,
    )
    .bind(&record.id)
    .bind(&record.store_id)
    .bind(&record.resource)
    .bind(&record.file_location)
    .bind(record.size)
    .bind(record.time_stored.unwrap_or(now))
    .bind(record.time_last_accessed.unwrap_or(now))
    .bind(record.timeout)
    .execute(executor)
    .await?;
    Ok(())
}

/// Get a row by id
pub async fn get(pool: &PgPool, id: &str) -> Result<Option<StoredFileRow>, sqlx::Error> {
    sqlx::query_as::<_, StoredFileRow>(&format!(
        "SELECT {} FROM stored_files WHERE id = $1",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Get the row caching `resource` in `store_id`. The hash comparison lets the
/// unique index answer the lookup.
pub async fn get_by_resource(
    pool: &PgPool,
    store_id: &str,
    resource: &str,
) -> Result<Option<StoredFileRow>, sqlx::Error> {
    sqlx::query_as::<_, StoredFileRow>(&format!(
        "SELECT {} FROM stored_files WHERE store_id = $1 AND md5(resource) = md5($2) AND resource = $2",
        COLUMNS
    ))
    .bind(store_id)
    .bind(resource)
    .fetch_optional(pool)
    .await
}

/// Delete a row by id, returning whether it existed
pub async fn delete(executor: impl PgExecutor<'_>, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM stored_files WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Rows of `store_id` whose timeout lies strictly before `now`
pub async fn get_expired(
    pool: &PgPool,
    store_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<StoredFileRow>, sqlx::Error> {
    sqlx::query_as::<_, StoredFileRow>(&format!(
        "SELECT {} FROM stored_files WHERE store_id = $1 AND timeout < $2 ORDER BY timeout",
        COLUMNS
    ))
    .bind(store_id)
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Least recently accessed rows of `store_id`
pub async fn get_least_recently_accessed(
    pool: &PgPool,
    store_id: &str,
    limit: i64,
) -> Result<Vec<StoredFileRow>, sqlx::Error> {
    sqlx::query_as::<_, StoredFileRow>(&format!(
        "SELECT {} FROM stored_files WHERE store_id = $1 ORDER BY time_last_accessed, id LIMIT $2",
        COLUMNS
    ))
    .bind(store_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Sum of known sizes in `store_id`
pub async fn total_size(pool: &PgPool, store_id: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(size), 0)::bigint FROM stored_files WHERE store_id = $1",
    )
    .bind(store_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Reclaim dead rows and refresh planner statistics
pub async fn vacuum(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql("VACUUM ANALYZE stored_files")
        .execute(pool)
        .await?;
    Ok(())
}
