//! Statement execution.
//!
//! Binds a [`ParsedStatement`]'s values and runs it on any sqlx executor, so
//! the same code serves the pool and an open transaction.
//!
//! # Architecture
//!
//! Database-specific implementations live in parallel submodules:
//! - `mysql`: MySQL/MariaDB
//! - `sqlite`: SQLite
//!
//! Statements without binds are sent as raw SQL, which avoids prepared
//! statement restrictions on some server-side statements.

use crate::error::DbResult;
use crate::models::{ParsedStatement, Value};

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    /// Last auto-generated id on this connection (0 when none).
    pub last_insert_id: i64,
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

pub(crate) mod mysql {
    use super::*;
    use sqlx::mysql::{MySqlArguments, MySqlRow};
    use sqlx::query::Query;
    use sqlx::{Executor, MySql};

    pub async fn fetch_all<'c, E>(executor: E, statement: &ParsedStatement) -> DbResult<Vec<MySqlRow>>
    where
        E: Executor<'c, Database = MySql>,
    {
        let rows = if statement.binds().is_empty() {
            executor.fetch_all(statement.sql()).await?
        } else {
            bind_all(statement).fetch_all(executor).await?
        };
        Ok(rows)
    }

    pub async fn execute<'c, E>(executor: E, statement: &ParsedStatement) -> DbResult<WriteOutcome>
    where
        E: Executor<'c, Database = MySql>,
    {
        let result = if statement.binds().is_empty() {
            executor.execute(statement.sql()).await?
        } else {
            bind_all(statement).execute(executor).await?
        };
        Ok(WriteOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: i64::try_from(result.last_insert_id()).unwrap_or(i64::MAX),
        })
    }

    fn bind_all(statement: &ParsedStatement) -> Query<'_, MySql, MySqlArguments> {
        statement
            .binds()
            .iter()
            .fold(sqlx::query(statement.sql()), bind_param)
    }

    fn bind_param<'q>(
        query: Query<'q, MySql, MySqlArguments>,
        param: &'q Value,
    ) -> Query<'q, MySql, MySqlArguments> {
        match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::String(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

pub(crate) mod sqlite {
    use super::*;
    use sqlx::query::Query;
    use sqlx::sqlite::{SqliteArguments, SqliteRow};
    use sqlx::{Executor, Sqlite};

    pub async fn fetch_all<'c, E>(
        executor: E,
        statement: &ParsedStatement,
    ) -> DbResult<Vec<SqliteRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let rows = if statement.binds().is_empty() {
            executor.fetch_all(statement.sql()).await?
        } else {
            bind_all(statement).fetch_all(executor).await?
        };
        Ok(rows)
    }

    pub async fn execute<'c, E>(executor: E, statement: &ParsedStatement) -> DbResult<WriteOutcome>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let result = if statement.binds().is_empty() {
            executor.execute(statement.sql()).await?
        } else {
            bind_all(statement).execute(executor).await?
        };
        Ok(WriteOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        })
    }

    fn bind_all(statement: &ParsedStatement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        statement
            .binds()
            .iter()
            .fold(sqlx::query(statement.sql()), bind_param)
    }

    fn bind_param<'q>(
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
        param: &'q Value,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::String(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}
