//! Integration tests for nested transactions.
//!
//! Only the outermost begin/commit pair reaches the database; a rollback at
//! any depth aborts everything. Effects are checked against the data, using
//! a fresh registry where durability matters.

use db_helper::DbError;
use db_helper::columns;
use db_helper::config::{Catalog, DatabaseSettings, PoolOptions};
use db_helper::db::{Connection, ConnectionRegistry, TxStep};
use db_helper::models::{DatabaseType, ParsedStatement};
use std::sync::Arc;
use tempfile::TempDir;

fn catalog_for(dir: &TempDir) -> Catalog {
    let settings = DatabaseSettings {
        driver: DatabaseType::SQLite,
        host: dir.path().join("tx.db").to_string_lossy().into_owned(),
        schema: None,
        user: None,
        password: None,
        pool: PoolOptions::default(),
    };
    Catalog::default().with_database("default", settings)
}

/// Helper to setup a registry with an `events` table.
async fn setup() -> (TempDir, ConnectionRegistry, Arc<Connection>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let registry = ConnectionRegistry::from_catalog(catalog_for(&dir));
    let conn = registry.default_connection().await.unwrap();
    conn.execute_statement(&ParsedStatement::new(
        "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        vec![],
    ))
    .await
    .expect("Failed to create test table");
    (dir, registry, conn)
}

/// Count rows through a brand-new registry, i.e. only committed data.
async fn committed_count(dir: &TempDir) -> i64 {
    let registry = ConnectionRegistry::from_catalog(catalog_for(dir));
    let conn = registry.default_connection().await.unwrap();
    let count = conn.select_count("events", &columns!()).await.unwrap();
    registry.close_all().await;
    count
}

#[tokio::test]
async fn test_nested_commit_reaches_driver_once() {
    let (dir, registry, conn) = setup().await;

    assert_eq!(conn.begin_transaction().await.unwrap(), TxStep::Opened);
    assert_eq!(conn.begin_transaction().await.unwrap(), TxStep::Joined);
    assert_eq!(conn.transaction_depth(), 2);

    conn.insert("events", &columns! { "name" => "nested" })
        .await
        .unwrap();

    assert_eq!(conn.commit().await.unwrap(), TxStep::Released);
    assert_eq!(conn.transaction_depth(), 1);
    assert_eq!(conn.commit().await.unwrap(), TxStep::Committed);
    assert_eq!(conn.transaction_depth(), 0);
    assert_eq!(registry.ledger().open_count(), 0);

    registry.close_all().await;
    assert_eq!(committed_count(&dir).await, 1);
}

#[tokio::test]
async fn test_inner_commit_does_not_survive_outer_rollback() {
    let (dir, registry, conn) = setup().await;

    conn.begin_transaction().await.unwrap();
    conn.begin_transaction().await.unwrap();
    conn.insert("events", &columns! { "name" => "inner" })
        .await
        .unwrap();
    assert_eq!(conn.commit().await.unwrap(), TxStep::Released);

    assert_eq!(conn.rollback().await.unwrap(), TxStep::RolledBack);
    assert_eq!(conn.transaction_depth(), 0);
    assert_eq!(conn.select_count("events", &columns!()).await.unwrap(), 0);

    registry.close_all().await;
    assert_eq!(committed_count(&dir).await, 0);
}

#[tokio::test]
async fn test_inner_rollback_aborts_everything() {
    let (_dir, _registry, conn) = setup().await;

    conn.begin_transaction().await.unwrap();
    conn.insert("events", &columns! { "name" => "outer" })
        .await
        .unwrap();
    conn.begin_transaction().await.unwrap();
    conn.insert("events", &columns! { "name" => "inner" })
        .await
        .unwrap();

    assert_eq!(conn.rollback().await.unwrap(), TxStep::RolledBack);
    assert_eq!(conn.transaction_depth(), 0);

    // The outer caller's commit finds nothing open.
    assert_eq!(conn.commit().await.unwrap(), TxStep::Inactive);
    assert_eq!(conn.select_count("events", &columns!()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_stray_commit_and_rollback_are_noops() {
    let (_dir, _registry, conn) = setup().await;

    assert_eq!(conn.commit().await.unwrap(), TxStep::Inactive);
    assert_eq!(conn.rollback().await.unwrap(), TxStep::Inactive);
    assert_eq!(conn.transaction_depth(), 0);

    // Extra commit after a balanced pair.
    conn.begin_transaction().await.unwrap();
    assert_eq!(conn.commit().await.unwrap(), TxStep::Committed);
    assert_eq!(conn.commit().await.unwrap(), TxStep::Inactive);
    assert_eq!(conn.transaction_depth(), 0);
}

#[tokio::test]
async fn test_reads_inside_transaction_see_own_writes() {
    let (_dir, _registry, conn) = setup().await;

    conn.begin_transaction().await.unwrap();
    let id = conn
        .insert("events", &columns! { "name" => "draft" })
        .await
        .unwrap();
    let row = conn.select_row_by_id("events", id).await.unwrap();
    assert_eq!(row.unwrap()["name"], "draft");
    conn.rollback().await.unwrap();

    assert!(conn.select_row_by_id("events", id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_callers_share_one_transaction() {
    let (dir, registry, conn) = setup().await;

    conn.begin_transaction().await.unwrap();
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.begin_transaction().await.unwrap();
                conn.insert("events", &columns! { "name" => format!("task-{i}") })
                    .await
                    .unwrap();
                conn.commit().await.unwrap()
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), TxStep::Released);
    }
    assert_eq!(conn.transaction_depth(), 1);
    assert_eq!(conn.commit().await.unwrap(), TxStep::Committed);

    registry.close_all().await;
    assert_eq!(committed_count(&dir).await, 4);
}

#[tokio::test]
async fn test_close_all_discards_open_transaction() {
    let (dir, registry, conn) = setup().await;

    conn.begin_transaction().await.unwrap();
    conn.insert("events", &columns! { "name" => "abandoned" })
        .await
        .unwrap();

    registry.close_all().await;
    assert_eq!(registry.ledger().open_count(), 0);
    assert_eq!(committed_count(&dir).await, 0);

    let fresh = registry.default_connection().await.unwrap();
    assert_eq!(fresh.transaction_depth(), 0);
    assert_eq!(fresh.begin_transaction().await.unwrap(), TxStep::Opened);
    fresh.rollback().await.unwrap();
}

#[tokio::test]
async fn test_orphaned_handle_cannot_touch_replacement_transaction() {
    let (dir, registry, orphan) = setup().await;
    registry.close_all().await;
    let fresh = registry.default_connection().await.unwrap();

    assert_eq!(fresh.begin_transaction().await.unwrap(), TxStep::Opened);

    let err = orphan.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(orphan.commit().await.is_err());
    assert!(orphan.rollback().await.is_err());
    assert_eq!(fresh.transaction_depth(), 1);

    fresh
        .insert("events", &columns! { "name" => "kept" })
        .await
        .unwrap();

    // Closing the orphan again must not disturb the fresh handle.
    orphan.close().await;
    assert_eq!(orphan.transaction_depth(), 0);
    assert_eq!(fresh.transaction_depth(), 1);

    assert_eq!(fresh.commit().await.unwrap(), TxStep::Committed);
    registry.close_all().await;
    assert_eq!(committed_count(&dir).await, 1);
}
