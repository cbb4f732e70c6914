//! Connection handle and the public operation surface.
//!
//! A [`Connection`] is opened and owned by the
//! [`ConnectionRegistry`](crate::db::ConnectionRegistry); callers receive an
//! `Arc<Connection>` and never build one themselves. Every statement and
//! every transaction call takes the handle's transaction slot lock, so work on
//! one handle is serialized and runs inside the open transaction when there
//! is one.

use crate::config::DatabaseSettings;
use crate::db::executor::{WriteOutcome, mysql, sqlite};
use crate::db::ledger::{LedgerKey, TransactionLedger, TxStep};
use crate::db::pool::DbPool;
use crate::db::query_builder::{QueryBuilder, counter_expression};
use crate::db::transaction::DbTransaction;
use crate::db::types::{Row, RowToJson};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnValue, Columns, ConnectionKey, DatabaseType, ParsedStatement, QueryKind, SelectOptions,
    Value, masked_connection_string,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// An open database connection identified by its [`ConnectionKey`].
pub struct Connection {
    /// Connection key plus the generation of this open.
    slot: LedgerKey,
    /// Connection string with the password masked.
    dsn: String,
    pool: DbPool,
    acquire_timeout_secs: u64,
    active: Mutex<Option<DbTransaction>>,
    ledger: Arc<TransactionLedger>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.slot.connection_key())
            .field("generation", &self.slot.generation())
            .field("db_type", &self.pool.db_type())
            .field("dsn", &self.dsn)
            .finish()
    }
}

impl Connection {
    /// Open the connection described by `settings` for `key`.
    ///
    /// `generation` distinguishes this open from earlier handles of the same
    /// key in the transaction ledger.
    pub(crate) async fn open(
        key: ConnectionKey,
        generation: u64,
        settings: &DatabaseSettings,
        ledger: Arc<TransactionLedger>,
    ) -> DbResult<Self> {
        let connection_string = settings.connection_string(key.server())?;
        let dsn = masked_connection_string(&connection_string);

        info!(
            connection = %key,
            db_type = %settings.driver,
            dsn = %dsn,
            "Opening database connection"
        );

        let pool = match DbPool::open(settings, &connection_string).await {
            Ok(pool) => pool,
            Err(e) => {
                error!(connection = %key, dsn = %dsn, error = %e, "Failed to open database connection");
                return Err(e);
            }
        };

        Ok(Self {
            slot: LedgerKey::new(key, generation),
            dsn,
            pool,
            acquire_timeout_secs: settings.pool.acquire_timeout_or_default(),
            active: Mutex::new(None),
            ledger,
        })
    }

    pub fn key(&self) -> &ConnectionKey {
        self.slot.connection_key()
    }

    /// Distinguishes this handle from earlier ones opened for the same key.
    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    /// Connection string with the password masked.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Current nesting depth of this connection's transaction.
    pub fn transaction_depth(&self) -> u32 {
        self.ledger.depth(&self.slot)
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn builder<'a>(&self, kind: QueryKind, table: &'a str) -> QueryBuilder<'a> {
        QueryBuilder::new(kind, table).dialect(self.database_type())
    }

    // =========================================================================
    // Select family
    // =========================================================================

    /// All rows matching `conditions`.
    pub async fn select_all(
        &self,
        table: &str,
        conditions: &Columns,
        options: &SelectOptions,
    ) -> DbResult<Vec<Row>> {
        let statement = self
            .builder(QueryKind::Select, table)
            .conditions(conditions)
            .options(options)
            .build();
        self.fetch_with("select_all", &statement, |row| row.to_json_map())
            .await
    }

    /// First matching row, or `None` when nothing matches.
    pub async fn select_row(
        &self,
        table: &str,
        conditions: &Columns,
        options: &SelectOptions,
    ) -> DbResult<Option<Row>> {
        let options = options.clone().limit(1);
        let statement = self
            .builder(QueryKind::Select, table)
            .conditions(conditions)
            .options(&options)
            .build();
        let rows = self
            .fetch_with("select_row", &statement, |row| row.to_json_map())
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Row whose `id` column equals `id`.
    pub async fn select_row_by_id(
        &self,
        table: &str,
        id: impl Into<Value>,
    ) -> DbResult<Option<Row>> {
        let id: Value = id.into();
        let conditions = crate::columns! { "id" => id };
        self.select_row(table, &conditions, &SelectOptions::default())
            .await
    }

    /// One column of every matching row.
    pub async fn select_column(
        &self,
        table: &str,
        column: &str,
        conditions: &Columns,
        options: &SelectOptions,
    ) -> DbResult<Vec<JsonValue>> {
        let statement = self
            .builder(QueryKind::SelectColumn(column.to_string()), table)
            .conditions(conditions)
            .options(options)
            .build();
        self.fetch_with("select_column", &statement, |row| row.value_at(0))
            .await
    }

    /// One column of the first matching row.
    ///
    /// `None` means no row matched; `Some(JsonValue::Null)` means the row
    /// exists and the cell is NULL.
    pub async fn select_cell(
        &self,
        table: &str,
        column: &str,
        conditions: &Columns,
        options: &SelectOptions,
    ) -> DbResult<Option<JsonValue>> {
        let statement = self
            .builder(QueryKind::SelectCell(column.to_string()), table)
            .conditions(conditions)
            .options(options)
            .build();
        let values = self
            .fetch_with("select_cell", &statement, |row| row.value_at(0))
            .await?;
        Ok(values.into_iter().next())
    }

    /// Number of matching rows.
    pub async fn select_count(&self, table: &str, conditions: &Columns) -> DbResult<i64> {
        let statement = self
            .builder(QueryKind::Count, table)
            .conditions(conditions)
            .build();
        let values = self
            .fetch_with("select_count", &statement, |row| row.value_at(0))
            .await?;
        values
            .first()
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| DbError::internal(format!("COUNT(*) on `{}` returned no number", table)))
    }

    /// True when at least one row matches.
    pub async fn exists(&self, table: &str, conditions: &Columns) -> DbResult<bool> {
        let statement = self
            .builder(QueryKind::Select, table)
            .conditions(conditions)
            .limit(1)
            .build();
        let rows = self
            .fetch_with("exists", &statement, |_| ())
            .await?;
        Ok(!rows.is_empty())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert one row and return the generated id (0 when the table has none).
    pub async fn insert(&self, table: &str, params: &Columns) -> DbResult<i64> {
        let statement = self.builder(QueryKind::Insert, table).params(params).build();
        let outcome = self.execute("insert", &statement).await?;
        Ok(outcome.last_insert_id)
    }

    /// Update matching rows and return the number affected.
    pub async fn update(
        &self,
        table: &str,
        params: &Columns,
        conditions: &Columns,
    ) -> DbResult<u64> {
        if params.is_empty() {
            return Err(DbError::invalid_input(format!(
                "update of `{}` needs at least one column",
                table
            )));
        }
        let statement = self
            .builder(QueryKind::Update, table)
            .params(params)
            .conditions(conditions)
            .build();
        let outcome = self.execute("update", &statement).await?;
        Ok(outcome.rows_affected)
    }

    /// Add each increment to its column on matching rows.
    ///
    /// Non-numeric increments count as `0`.
    pub async fn update_counters(
        &self,
        table: &str,
        increments: &Columns,
        conditions: &Columns,
    ) -> DbResult<u64> {
        let params: Columns = increments
            .iter()
            .map(|(column, increment)| {
                let expression = counter_expression(column, increment);
                (column.clone(), ColumnValue::Expression(expression))
            })
            .collect();
        self.update(table, &params, conditions).await
    }

    /// Delete matching rows and return the number affected.
    pub async fn delete(&self, table: &str, conditions: &Columns) -> DbResult<u64> {
        let statement = self
            .builder(QueryKind::Delete, table)
            .conditions(conditions)
            .build();
        let outcome = self.execute("delete", &statement).await?;
        Ok(outcome.rows_affected)
    }

    // =========================================================================
    // Prepared statements
    // =========================================================================

    /// Run a built statement and decode every row.
    pub async fn fetch_statement(&self, statement: &ParsedStatement) -> DbResult<Vec<Row>> {
        self.fetch_with("statement", statement, |row| row.to_json_map())
            .await
    }

    /// Run a built statement and return the number of affected rows.
    pub async fn execute_statement(&self, statement: &ParsedStatement) -> DbResult<u64> {
        let outcome = self.execute("statement", statement).await?;
        Ok(outcome.rows_affected)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Enter a transaction. Only the outermost call opens a native one.
    pub async fn begin_transaction(&self) -> DbResult<TxStep> {
        let mut active = self.active.lock().await;
        self.ensure_open()?;
        let step = self.ledger.begin(&self.slot);

        if step != TxStep::Opened {
            debug!(
                connection = %self.slot,
                depth = self.ledger.depth(&self.slot),
                "Joined open transaction"
            );
            return Ok(step);
        }

        if let Some(stale) = active.take() {
            warn!(connection = %self.slot, "Discarding transaction unknown to the ledger");
            if let Err(e) = stale.rollback().await {
                warn!(connection = %self.slot, error = %e, "Rollback of stale transaction failed");
            }
        }

        match self.pool.begin().await {
            Ok(tx) => {
                *active = Some(tx);
                info!(connection = %self.slot, "Transaction started");
                Ok(step)
            }
            Err(e) => {
                self.ledger.forget(&self.slot);
                Err(e.with_timeout_secs(self.acquire_timeout_secs))
            }
        }
    }

    /// Leave one transaction level. The outermost commit reaches the driver;
    /// a commit with nothing open is a no-op.
    pub async fn commit(&self) -> DbResult<TxStep> {
        let mut active = self.active.lock().await;
        self.ensure_open()?;
        let step = self.ledger.commit(&self.slot);

        match step {
            TxStep::Committed => match active.take() {
                Some(tx) => {
                    tx.commit().await?;
                    info!(connection = %self.slot, "Transaction committed");
                }
                None => warn!(connection = %self.slot, "Commit with no native transaction"),
            },
            TxStep::Released => debug!(
                connection = %self.slot,
                depth = self.ledger.depth(&self.slot),
                "Released nested transaction level"
            ),
            _ => debug!(connection = %self.slot, "Commit ignored, no transaction open"),
        }
        Ok(step)
    }

    /// Abort the transaction at any depth; outer commits become no-ops.
    pub async fn rollback(&self) -> DbResult<TxStep> {
        let mut active = self.active.lock().await;
        self.ensure_open()?;
        let step = self.ledger.rollback(&self.slot);

        match step {
            TxStep::RolledBack => match active.take() {
                Some(tx) => {
                    tx.rollback().await?;
                    info!(connection = %self.slot, "Transaction rolled back");
                }
                None => warn!(connection = %self.slot, "Rollback with no native transaction"),
            },
            _ => debug!(connection = %self.slot, "Rollback ignored, no transaction open"),
        }
        Ok(step)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Round-trip a trivial statement.
    pub async fn ping(&self) -> DbResult<()> {
        let statement = ParsedStatement::new("SELECT 1", Vec::new());
        self.fetch_with("ping", &statement, |row| row.value_at(0))
            .await?;
        Ok(())
    }

    /// Server version string, or `None` if it cannot be read.
    pub async fn server_version(&self) -> Option<String> {
        let sql = match self.database_type() {
            DatabaseType::MySQL => "SELECT version()",
            DatabaseType::SQLite => "SELECT sqlite_version()",
        };
        let statement = ParsedStatement::new(sql, Vec::new());
        match self
            .fetch_with("server_version", &statement, |row| row.value_at(0))
            .await
        {
            Ok(values) => {
                let version = values
                    .into_iter()
                    .next()
                    .and_then(|v| v.as_str().map(String::from));
                debug!(connection = %self.slot, version = ?version, "Got server version");
                version
            }
            Err(e) => {
                warn!(connection = %self.slot, error = %e, "Failed to get server version");
                None
            }
        }
    }

    /// Close the underlying pool, rolling back any open transaction.
    ///
    /// Closing an already closed handle does nothing.
    pub async fn close(&self) {
        let mut active = self.active.lock().await;
        if self.pool.is_closed() {
            debug!(connection = %self.slot, "Connection already closed");
            return;
        }
        if let Some(tx) = active.take() {
            warn!(connection = %self.slot, "Closing connection with an open transaction");
            if let Err(e) = tx.rollback().await {
                warn!(connection = %self.slot, error = %e, "Rollback on close failed");
            }
        }
        self.ledger.forget(&self.slot);
        self.pool.close().await;
        info!(connection = %self.slot, "Connection closed");
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn ensure_open(&self) -> DbResult<()> {
        if self.pool.is_closed() {
            return Err(DbError::connection(
                "Connection is closed",
                "Obtain a fresh connection from the registry",
            ));
        }
        Ok(())
    }

    async fn fetch_with<T>(
        &self,
        operation: &'static str,
        statement: &ParsedStatement,
        decode: impl Fn(&dyn RowToJson) -> T,
    ) -> DbResult<Vec<T>> {
        debug!(
            connection = %self.slot,
            operation,
            binds = statement.binds().len(),
            "Fetching rows"
        );
        let mut active = self.active.lock().await;
        let result: DbResult<Vec<T>> = crate::with_executor!(&self.pool, active.as_mut(), {
            MySql(executor) => {
                mysql::fetch_all(executor, statement)
                    .await
                    .map(|rows| rows.iter().map(|row| decode(row)).collect())
            },
            SQLite(executor) => {
                sqlite::fetch_all(executor, statement)
                    .await
                    .map(|rows| rows.iter().map(|row| decode(row)).collect())
            },
        });
        result.map_err(|e| e.with_timeout_secs(self.acquire_timeout_secs))
    }

    async fn execute(
        &self,
        operation: &'static str,
        statement: &ParsedStatement,
    ) -> DbResult<WriteOutcome> {
        debug!(
            connection = %self.slot,
            operation,
            binds = statement.binds().len(),
            "Executing statement"
        );
        let mut active = self.active.lock().await;
        let result = crate::with_executor!(&self.pool, active.as_mut(), {
            MySql(executor) => mysql::execute(executor, statement).await,
            SQLite(executor) => sqlite::execute(executor, statement).await,
        });
        result.map_err(|e| e.with_timeout_secs(self.acquire_timeout_secs))
    }
}
