//! Data models for the data-access helper.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod statement;
pub mod value;

// Re-export commonly used types
pub use connection::{ConnectionKey, DatabaseType, masked_connection_string};
pub use statement::{ParsedStatement, QueryKind, SelectOptions};
pub use value::{ColumnValue, Columns, Expression, IS_NOT_NULL, IS_NULL, Value};
