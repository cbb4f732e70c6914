//! Keyed cache of open connections.
//!
//! # Design Decisions
//!
//! - **Injectable object, no statics**: callers construct a registry and share
//!   it (usually behind an `Arc`)
//! - **`OnceCell` per connection key**: single-flight creation, concurrent
//!   requests for the same key wait for the first open to complete
//! - **`AtomicBool` test-mode flag**: only affects lookups made after it changes
//! - **Lazy catalog**: the configuration document is read on first lookup and
//!   cached for the registry's lifetime
//!
//! # Concurrency Safety
//!
//! - The cache lock is released before any connection is opened (await point)
//! - A failed open leaves no cached entry, so the key can be retried
//! - `close_all` drains the cache under the write lock and closes pools after
//!   releasing it; handles still held elsewhere become orphaned
//! - Every open gets a new generation, so an orphaned handle never shares
//!   transaction state with the handle that replaced it

use crate::config::{Catalog, CatalogSource, DEFAULT_DATABASE};
use crate::db::connection::Connection;
use crate::db::ledger::TransactionLedger;
use crate::error::DbResult;
use crate::models::ConnectionKey;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

type ConnectionCell = Arc<OnceCell<Arc<Connection>>>;

pub struct ConnectionRegistry {
    source: CatalogSource,
    catalog: OnceCell<Catalog>,
    connections: RwLock<HashMap<ConnectionKey, ConnectionCell>>,
    test_mode: AtomicBool,
    /// Generation handed to the next opened connection.
    next_generation: AtomicU64,
    ledger: Arc<TransactionLedger>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("source", &self.source)
            .field("catalog_loaded", &self.catalog.initialized())
            .field("test_mode", &self.is_test_mode())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(source: CatalogSource) -> Self {
        Self {
            source,
            catalog: OnceCell::new(),
            connections: RwLock::new(HashMap::new()),
            test_mode: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
            ledger: Arc::new(TransactionLedger::new()),
        }
    }

    /// Registry over an in-memory catalog.
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self::new(CatalogSource::Inline(catalog))
    }

    /// Registry over a JSON catalog file, read on first use.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(CatalogSource::File(path.into()))
    }

    async fn catalog(&self) -> DbResult<&Catalog> {
        self.catalog.get_or_try_init(|| self.source.load()).await
    }

    /// Get the connection for `database`, optionally on a specific `server`.
    ///
    /// In test mode, names listed under `test_databases` are redirected to
    /// their test counterpart. The same key always yields the same handle
    /// until [`close_all`](Self::close_all).
    pub async fn get_connection(
        &self,
        database: &str,
        server: Option<&str>,
    ) -> DbResult<Arc<Connection>> {
        let catalog = self.catalog().await?;

        let name = match self.is_test_mode() {
            true => catalog.test_name(database).unwrap_or(database),
            false => database,
        };
        if name != database {
            debug!(database = %database, test_database = %name, "Redirecting to test database");
        }

        let key = ConnectionKey::new(name, server);
        if let Some(connection) = self.cached(&key).await {
            return Ok(connection);
        }

        let settings = catalog.database(name)?;
        let cell = self.cell_for(&key).await;
        let result = cell
            .get_or_try_init(|| async {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                Connection::open(key.clone(), generation, settings, Arc::clone(&self.ledger))
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned();

        if result.is_err() {
            self.discard_failed(&key, &cell).await;
        }
        result
    }

    /// Connection for the `"default"` database on its configured host.
    pub async fn default_connection(&self) -> DbResult<Arc<Connection>> {
        self.get_connection(DEFAULT_DATABASE, None).await
    }

    async fn cached(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(key).and_then(|cell| cell.get().cloned())
    }

    async fn cell_for(&self, key: &ConnectionKey) -> ConnectionCell {
        {
            let connections = self.connections.read().await;
            if let Some(cell) = connections.get(key) {
                return Arc::clone(cell);
            }
        }
        let mut connections = self.connections.write().await;
        // Double-check after acquiring write lock
        Arc::clone(
            connections
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    /// Drop an empty cell left behind by a failed open, unless another caller
    /// has already replaced or filled it.
    async fn discard_failed(&self, key: &ConnectionKey, cell: &ConnectionCell) {
        let mut connections = self.connections.write().await;
        let stale = connections
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if stale {
            connections.remove(key);
        }
    }

    /// Turn test-database redirection on or off for subsequent lookups.
    ///
    /// Connections already handed out are not affected.
    pub fn set_test_mode(&self, enabled: bool) {
        let previous = self.test_mode.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Test mode changed");
        }
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode.load(Ordering::SeqCst)
    }

    /// Close every cached connection and forget all transaction state.
    pub async fn close_all(&self) {
        let drained: Vec<(ConnectionKey, ConnectionCell)> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };

        for (key, cell) in &drained {
            if let Some(connection) = cell.get() {
                debug!(connection = %key, "Closing connection");
                connection.close().await;
            }
        }
        self.ledger.clear();
        info!(count = drained.len(), "All connections closed");
    }

    /// Number of open cached connections.
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.values().filter(|cell| cell.initialized()).count()
    }

    /// The shared transaction ledger.
    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseSettings, PoolOptions};
    use crate::error::DbError;
    use crate::models::DatabaseType;

    fn sqlite(path: &std::path::Path) -> DatabaseSettings {
        DatabaseSettings {
            driver: DatabaseType::SQLite,
            host: path.to_string_lossy().into_owned(),
            schema: None,
            user: None,
            password: None,
            pool: PoolOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let registry = ConnectionRegistry::from_catalog(Catalog::default());
        assert_eq!(registry.connection_count().await, 0);
        assert!(!registry.is_test_mode());
        assert_eq!(registry.ledger().open_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let registry = ConnectionRegistry::from_catalog(Catalog::default());
        let result = registry.get_connection("missing", None).await;
        assert!(matches!(result, Err(DbError::DatabaseNotFound { .. })));
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::from_path(dir.path().join("absent.json"));
        let result = registry.default_connection().await;
        assert!(matches!(result, Err(DbError::Config { .. })));
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let unreachable = dir.path().join("no_such_dir").join("app.db");
        let catalog = Catalog::default().with_database("default", sqlite(&unreachable));
        let registry = ConnectionRegistry::from_catalog(catalog);

        let result = registry.default_connection().await;
        assert!(matches!(result, Err(DbError::Connection { .. })));
        assert!(registry.connections.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_test_mode_toggle() {
        let registry = ConnectionRegistry::from_catalog(Catalog::default());
        registry.set_test_mode(true);
        assert!(registry.is_test_mode());
        registry.set_test_mode(false);
        assert!(!registry.is_test_mode());
    }

    #[tokio::test]
    async fn test_close_all_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let catalog =
            Catalog::default().with_database("default", sqlite(&dir.path().join("app.db")));
        let registry = ConnectionRegistry::from_catalog(catalog);

        let conn = registry.default_connection().await.unwrap();
        conn.begin_transaction().await.unwrap();
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.ledger().open_count(), 1);

        registry.close_all().await;
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.ledger().open_count(), 0);
        assert!(conn.is_closed());
    }
}
