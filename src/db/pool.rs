//! Driver pool wrapper.
//!
//! Each cached connection owns one of these, capped at a single physical
//! connection. Backend-specific pools are kept apart (no `AnyPool`) so rows
//! keep their full type information.

use crate::config::DatabaseSettings;
use crate::db::transaction::DbTransaction;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlx::{
    MySqlPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::time::Duration;

/// Physical connections per cached handle.
const CONNECTIONS_PER_HANDLE: u32 = 1;

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool for a catalog entry using an already resolved connection string.
    pub async fn open(settings: &DatabaseSettings, connection_string: &str) -> DbResult<Self> {
        let pool_opts = &settings.pool;
        let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));
        let db_type = settings.driver;

        match db_type {
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::from_str(connection_string)
                    .map_err(|e| {
                        DbError::connection(
                            format!("Invalid MySQL connection string: {}", e),
                            "Check the host, schema and credentials in the catalog",
                        )
                    })?
                    .charset("utf8mb4");

                let pool = MySqlPoolOptions::new()
                    .max_connections(CONNECTIONS_PER_HANDLE)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        DbError::connection(
                            format!("Failed to connect: {}", e),
                            connection_suggestion(db_type, &e),
                        )
                    })?;
                Ok(DbPool::MySql(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(connection_string)
                    .map_err(|e| {
                        DbError::connection(
                            format!("Invalid SQLite connection string: {}", e),
                            "Set host to the database file path",
                        )
                    })?
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(CONNECTIONS_PER_HANDLE)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        DbError::connection(
                            format!("Failed to connect: {}", e),
                            connection_suggestion(db_type, &e),
                        )
                    })?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    /// Start a native transaction on the pool's connection.
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        match self {
            DbPool::MySql(pool) => Ok(DbTransaction::MySql(pool.begin().await?)),
            DbPool::SQLite(pool) => Ok(DbTransaction::SQLite(pool.begin().await?)),
        }
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Generate a helpful suggestion for connection errors.
pub fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password of the catalog entry".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the schema exists on the server".to_string();
    }

    if error_str.contains("unable to open") {
        return "Check that the directory of the SQLite file exists and is writable".to_string();
    }

    match db_type {
        DatabaseType::MySQL => {
            "Verify the catalog entry: host (with optional :port), schema, user, password"
                .to_string()
        }
        DatabaseType::SQLite => "Verify the file path in the catalog entry's host".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;

    fn sqlite_settings(path: &str) -> DatabaseSettings {
        DatabaseSettings {
            driver: DatabaseType::SQLite,
            host: path.to_string(),
            schema: None,
            user: None,
            password: None,
            pool: PoolOptions::default(),
        }
    }

    #[test]
    fn test_connection_suggestion_refused() {
        let err = sqlx::Error::Protocol("connection refused".to_string());
        let suggestion = connection_suggestion(DatabaseType::MySQL, &err);
        assert!(suggestion.contains("MySQL server is running"));
    }

    #[test]
    fn test_connection_suggestion_fallback() {
        let err = sqlx::Error::Protocol("something odd".to_string());
        assert!(connection_suggestion(DatabaseType::SQLite, &err).contains("file path"));
    }

    #[tokio::test]
    async fn test_open_sqlite_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let path = path.to_str().unwrap();
        let settings = sqlite_settings(path);

        let pool = DbPool::open(&settings, &format!("sqlite:{}", path))
            .await
            .unwrap();
        assert_eq!(pool.db_type(), DatabaseType::SQLite);
        assert!(std::path::Path::new(path).exists());

        let tx = pool.begin().await.unwrap();
        assert_eq!(tx.db_type(), DatabaseType::SQLite);
        tx.rollback().await.unwrap();

        pool.close().await;
        assert!(pool.is_closed());
    }
}
