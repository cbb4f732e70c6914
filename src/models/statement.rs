//! Statement-related data models.
//!
//! This module defines the query kinds understood by the builder, the
//! ordering/limit options of the select family and the built statement.

use crate::models::Value;
use tracing::warn;

/// The statement shape to build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryKind {
    /// `SELECT * FROM t`
    #[default]
    Select,
    /// `SELECT c FROM t ... LIMIT 1`
    SelectCell(String),
    /// `SELECT c FROM t`
    SelectColumn(String),
    /// `SELECT COUNT(*) FROM t`
    Count,
    Insert,
    Update,
    Delete,
}

impl QueryKind {
    /// Parse a textual kind such as `"select_cell"`.
    ///
    /// Unknown names, and cell/column kinds without a column, degrade to
    /// [`QueryKind::Select`]. Treat the fallback as a programming error to be
    /// caught in tests rather than something to rely on.
    pub fn from_name(name: &str, column: Option<&str>) -> Self {
        let kind = match (name.to_ascii_lowercase().as_str(), column) {
            ("select", _) => Some(Self::Select),
            ("select_cell", Some(c)) => Some(Self::SelectCell(c.to_string())),
            ("select_column", Some(c)) => Some(Self::SelectColumn(c.to_string())),
            ("count", _) => Some(Self::Count),
            ("insert", _) => Some(Self::Insert),
            ("update", _) => Some(Self::Update),
            ("delete", _) => Some(Self::Delete),
            _ => None,
        };
        kind.unwrap_or_else(|| {
            warn!(kind = %name, "Unrecognized query kind, falling back to SELECT *");
            Self::Select
        })
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::SelectCell(_) => "select_cell",
            Self::SelectColumn(_) => "select_column",
            Self::Count => "count",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// True for the kinds that carry a SET clause.
    pub fn writes_columns(&self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordering and limit for the select family. Both are appended verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOptions {
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ORDER BY text (caller-trusted, not parameterized).
    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Set the row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A statement with `?` placeholders and the values to bind, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    sql: String,
    binds: Vec<Value>,
}

impl ParsedStatement {
    pub fn new(sql: impl Into<String>, binds: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &[Value] {
        &self.binds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_known_kinds() {
        assert_eq!(QueryKind::from_name("INSERT", None), QueryKind::Insert);
        assert_eq!(QueryKind::from_name("count", None), QueryKind::Count);
        assert_eq!(
            QueryKind::from_name("select_cell", Some("email")),
            QueryKind::SelectCell("email".to_string())
        );
    }

    #[test]
    fn test_from_name_falls_back_to_select() {
        assert_eq!(QueryKind::from_name("upsert", None), QueryKind::Select);
        assert_eq!(QueryKind::from_name("select_column", None), QueryKind::Select);
    }

    #[test]
    fn test_select_options_builder() {
        let opts = SelectOptions::new().order_by("id DESC").limit(5);
        assert_eq!(opts.order_by.as_deref(), Some("id DESC"));
        assert_eq!(opts.limit, Some(5));
        assert_eq!(SelectOptions::default().limit, None);
    }

    #[test]
    fn test_writes_columns() {
        assert!(QueryKind::Insert.writes_columns());
        assert!(QueryKind::Update.writes_columns());
        assert!(!QueryKind::Delete.writes_columns());
    }
}
