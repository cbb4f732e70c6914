//! Statement construction from structured calls.
//!
//! [`QueryBuilder`] turns a [`QueryKind`], a table, a parameter mapping, a
//! condition mapping and optional ordering/limit into a [`ParsedStatement`]
//! with `?` placeholders. Building is pure: no I/O, no validation beyond
//! back-tick quoting of identifiers.
//!
//! # Trust boundary
//!
//! Table names, column names, ORDER BY text and [`Expression`] fragments are
//! emitted verbatim. Only values are parameterized. Never feed untrusted input
//! into those positions.
//!
//! # NULL handling
//!
//! - SET clause: a NULL value is written as the literal `NULL` and is not
//!   bound.
//! - WHERE clause: NULL and the case-insensitive sentinel `"IS NULL"` become
//!   `IS NULL`; `"IS NOT NULL"` becomes `IS NOT NULL`. Neither is bound.

use crate::models::{
    ColumnValue, Columns, DatabaseType, Expression, IS_NOT_NULL, IS_NULL, ParsedStatement,
    QueryKind, SelectOptions, Value,
};

/// Fluent builder for one statement.
#[derive(Debug, Clone)]
pub struct QueryBuilder<'a> {
    kind: QueryKind,
    table: &'a str,
    dialect: DatabaseType,
    params: Option<&'a Columns>,
    conditions: Option<&'a Columns>,
    order_by: Option<&'a str>,
    limit: Option<u64>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(kind: QueryKind, table: &'a str) -> Self {
        Self {
            kind,
            table,
            dialect: DatabaseType::default(),
            params: None,
            conditions: None,
            order_by: None,
            limit: None,
        }
    }

    /// Columns written by INSERT/UPDATE. Ignored for other kinds.
    #[must_use]
    pub fn params(mut self, params: &'a Columns) -> Self {
        self.params = Some(params);
        self
    }

    /// Columns compared in the WHERE clause.
    #[must_use]
    pub fn conditions(mut self, conditions: &'a Columns) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// ORDER BY text, appended verbatim.
    #[must_use]
    pub fn order_by(mut self, order_by: &'a str) -> Self {
        self.order_by = Some(order_by);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply both parts of [`SelectOptions`].
    #[must_use]
    pub fn options(mut self, options: &'a SelectOptions) -> Self {
        self.order_by = options.order_by.as_deref();
        self.limit = options.limit;
        self
    }

    /// Target dialect. Only changes the INSERT form (SQLite has no
    /// `INSERT ... SET`).
    #[must_use]
    pub fn dialect(mut self, dialect: DatabaseType) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn build(self) -> ParsedStatement {
        let table = quote_identifier(self.table);
        let mut binds = Vec::new();

        let mut sql = match &self.kind {
            QueryKind::Insert => format!("INSERT INTO {}", table),
            QueryKind::Update => format!("UPDATE {}", table),
            QueryKind::Delete => format!("DELETE FROM {}", table),
            QueryKind::Count => format!("SELECT COUNT(*) FROM {}", table),
            QueryKind::SelectCell(column) | QueryKind::SelectColumn(column) => {
                format!("SELECT {} FROM {}", quote_identifier(column), table)
            }
            QueryKind::Select => format!("SELECT * FROM {}", table),
        };

        let params = self.params.filter(|p| !p.is_empty());
        match (&self.kind, self.dialect, params) {
            (QueryKind::Insert, DatabaseType::SQLite, Some(params)) => {
                sql.push(' ');
                sql.push_str(&values_clause(params, &mut binds));
            }
            (QueryKind::Insert, DatabaseType::SQLite, None) => sql.push_str(" DEFAULT VALUES"),
            (kind, _, Some(params)) if kind.writes_columns() => {
                sql.push_str(" SET ");
                sql.push_str(&set_clause(params, &mut binds));
            }
            _ => {}
        }

        if let Some(conditions) = self.conditions.filter(|c| !c.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause(conditions, &mut binds));
        }

        if let Some(order_by) = self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }

        let limit = match self.kind {
            QueryKind::SelectCell(_) => Some(1),
            _ => self.limit,
        };
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        ParsedStatement::new(sql, binds)
    }
}

/// Wrap an identifier in back-ticks. No escaping: identifiers are trusted.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name)
}

/// SET-side rendering of one value: raw SQL, literal NULL, or a placeholder.
fn assignment_value(value: &ColumnValue, binds: &mut Vec<Value>) -> String {
    match value {
        ColumnValue::Expression(expr) => expr.as_sql().to_string(),
        ColumnValue::Value(Value::Null) => "NULL".to_string(),
        ColumnValue::Value(v) => {
            binds.push(v.clone());
            "?".to_string()
        }
    }
}

fn set_clause(params: &Columns, binds: &mut Vec<Value>) -> String {
    params
        .iter()
        .map(|(column, value)| {
            format!(
                "{} = {}",
                quote_identifier(column),
                assignment_value(value, binds)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn values_clause(params: &Columns, binds: &mut Vec<Value>) -> String {
    let columns: Vec<String> = params.keys().map(|c| quote_identifier(c)).collect();
    let values: Vec<String> = params
        .values()
        .map(|v| assignment_value(v, binds))
        .collect();
    format!("({}) VALUES ({})", columns.join(", "), values.join(", "))
}

fn where_clause(conditions: &Columns, binds: &mut Vec<Value>) -> String {
    conditions
        .iter()
        .map(|(column, value)| {
            let column = quote_identifier(column);
            match value {
                ColumnValue::Expression(expr) => format!("{} = {}", column, expr.as_sql()),
                ColumnValue::Value(Value::Null) => format!("{} IS NULL", column),
                ColumnValue::Value(Value::String(s)) if s.eq_ignore_ascii_case(IS_NULL) => {
                    format!("{} IS NULL", column)
                }
                ColumnValue::Value(Value::String(s)) if s.eq_ignore_ascii_case(IS_NOT_NULL) => {
                    format!("{} IS NOT NULL", column)
                }
                ColumnValue::Value(v) => {
                    binds.push(v.clone());
                    format!("{} = ?", column)
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Rewrite a counter increment as `` `column` + n ``.
///
/// Integers, finite floats and numeric strings are accepted; the number is
/// re-rendered from its parsed form so no caller text reaches the SQL.
/// Anything else counts as `0`.
pub fn counter_expression(column: &str, increment: &ColumnValue) -> Expression {
    let amount = match increment {
        ColumnValue::Value(Value::Int(n)) => n.to_string(),
        ColumnValue::Value(Value::Float(f)) if f.is_finite() => f.to_string(),
        ColumnValue::Value(Value::String(s)) => numeric_string(s).unwrap_or_else(|| "0".into()),
        _ => "0".to_string(),
    };
    Expression::new(format!("{} + {}", quote_identifier(column), amount))
}

fn numeric_string(s: &str) -> Option<String> {
    let s = s.trim();
    if let Ok(n) = s.parse::<i64>() {
        return Some(n.to_string());
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.to_string())
}
