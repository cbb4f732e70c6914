//! Declarative macros for building column mappings and dispatching on the
//! active executor.

/// Build a [`Columns`](crate::models::Columns) mapping in insertion order.
///
/// # Example
///
/// ```
/// use db_helper::columns;
/// use db_helper::models::{Expression, Value};
///
/// let params = columns! {
///     "email" => "ann@example.com",
///     "created_at" => Expression::new("NOW()"),
///     "deleted_at" => Value::Null,
/// };
/// assert_eq!(params.len(), 3);
/// ```
#[macro_export]
macro_rules! columns {
    () => {
        $crate::models::Columns::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut columns = $crate::models::Columns::new();
        $(
            columns.insert(
                ::std::string::String::from($name),
                $crate::models::ColumnValue::from($value),
            );
        )+
        columns
    }};
}

/// Run a body against whichever executor currently serves a connection.
///
/// When a native transaction is open the body gets `&mut` to the
/// transaction's connection; otherwise it gets the pool. The body is expanded
/// once per backend, so it can use backend-specific helpers.
///
/// ```ignore
/// with_executor!(&self.pool, active.as_mut(), {
///     MySql(e) => mysql::execute(e, statement).await,
///     SQLite(e) => sqlite::execute(e, statement).await,
/// })
/// ```
#[macro_export]
macro_rules! with_executor {
    ($pool:expr, $active:expr, {
        MySql($my:ident) => $my_body:expr,
        SQLite($lite:ident) => $lite_body:expr $(,)?
    }) => {
        match ($pool, $active) {
            (_, Some($crate::db::transaction::DbTransaction::MySql(tx))) => {
                let $my = &mut **tx;
                $my_body
            }
            (_, Some($crate::db::transaction::DbTransaction::SQLite(tx))) => {
                let $lite = &mut **tx;
                $lite_body
            }
            ($crate::db::pool::DbPool::MySql(pool), None) => {
                let $my = pool;
                $my_body
            }
            ($crate::db::pool::DbPool::SQLite(pool), None) => {
                let $lite = pool;
                $lite_body
            }
        }
    };
}
