//! db-helper library
//!
//! Turns structured select/insert/update/delete calls into parameterized SQL,
//! runs them over cached named connections (MySQL/MariaDB and SQLite) and
//! nests transactions across independent call sites.
//!
//! ```no_run
//! use db_helper::columns;
//! use db_helper::db::ConnectionRegistry;
//! use db_helper::models::SelectOptions;
//!
//! # async fn run() -> db_helper::error::DbResult<()> {
//! let registry = ConnectionRegistry::from_path("databases.json");
//! let db = registry.default_connection().await?;
//!
//! db.begin_transaction().await?;
//! let id = db.insert("users", &columns! { "email" => "ann@example.com" }).await?;
//! db.commit().await?;
//!
//! let user = db.select_row_by_id("users", id).await?;
//! let active = db
//!     .select_all("users", &columns! { "deleted_at" => "IS NULL" }, &SelectOptions::new().limit(10))
//!     .await?;
//! # let _ = (user, active);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{Connection, ConnectionRegistry};
pub use error::DbError;
