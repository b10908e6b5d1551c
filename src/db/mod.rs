/// Database layer for PayFlow
///
/// Manages the SQLite connection pool, migrations, and the single
/// timestamp normalization path used by every repository.

pub mod accounts;
pub mod audit;
pub mod checkpoints;
pub mod credentials;
pub mod ledger;
pub mod models;

use crate::error::{PayflowError, PayflowResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqlitePool;
use std::path::Path;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> PayflowResult<SqlitePool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PayflowError::Internal(format!("Failed to create data dir: {}", e)))?;
    }

    let pool = SqlitePool::connect_with(
        sqlx::sqlite::SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(if options.enable_wal {
                sqlx::sqlite::SqliteJournalMode::Wal
            } else {
                sqlx::sqlite::SqliteJournalMode::Delete
            })
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5)),
    )
    .await
    .map_err(PayflowError::Database)?;

    Ok(pool)
}

/// Run migrations, embedded at compile time from ./migrations
pub async fn run_migrations(pool: &SqlitePool) -> PayflowResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| PayflowError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> PayflowResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(PayflowError::Database)?;

    Ok(())
}

/// Serialize an instant for storage. RFC 3339 with explicit offset.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a stored timestamp back to a UTC instant.
///
/// Accepts RFC 3339 with any offset. Naive timestamps indicate a data
/// integrity bug upstream; they are normalized to UTC rather than
/// allowed to poison a comparison.
pub fn parse_utc(raw: &str) -> PayflowResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }

    Err(PayflowError::Internal(format!(
        "Unparseable timestamp in database: {}",
        raw
    )))
}

/// True when an insert failed because a unique constraint fired.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_utc("2026-02-10T12:00:00-03:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2026, 2, 10, 15, 0, 0).unwrap());
    }

    #[test]
    fn normalizes_naive_to_utc() {
        let dt = parse_utc("2026-02-10T12:00:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap());

        let dt = parse_utc("2026-02-10 12:00:00.500").unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn round_trips_format() {
        let now = Utc::now();
        let parsed = parse_utc(&format_utc(now)).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_utc("yesterday").is_err());
    }

    #[tokio::test]
    async fn pool_creates_missing_file_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("payflow.db");

        let pool = create_pool(&path, DatabaseOptions::default()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        test_connection(&pool).await.unwrap();

        assert!(path.exists());
    }
}
