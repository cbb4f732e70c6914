//! Database layer.
//!
//! This module provides:
//! - Statement construction from structured calls
//! - Nested transaction bookkeeping
//! - Statement execution and row decoding
//! - The connection handle and the registry that owns it

#[macro_use]
pub mod macros;
pub mod connection;
pub mod executor;
pub mod ledger;
pub mod pool;
pub mod query_builder;
pub mod registry;
pub mod transaction;
pub mod types;

pub use connection::Connection;
pub use ledger::{LedgerKey, TransactionLedger, TxStep};
pub use pool::DbPool;
pub use query_builder::{QueryBuilder, counter_expression, quote_identifier};
pub use registry::ConnectionRegistry;
pub use transaction::DbTransaction;
pub use types::{Row, RowToJson};
