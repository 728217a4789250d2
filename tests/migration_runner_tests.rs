//! Migration runner behavior against scratch migration directories.

mod test_utils;

use std::fs;

use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use social_selling::migrator::{MigrationError, MigrationRunner, MigrationState};
use tempfile::TempDir;

use test_utils::{migrations_dir, setup_empty_db};

fn write_migration(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

async fn has_table(db: &DatabaseConnection, table: &str) -> bool {
    db.query_one(Statement::from_sql_and_values(
        db.get_database_backend(),
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table.into()],
    ))
    .await
    .unwrap()
    .is_some()
}

#[tokio::test]
async fn init_migration_round_trip() {
    let db = setup_empty_db().await.unwrap();
    let dir = TempDir::new().unwrap();
    write_migration(
        &dir,
        "001_init.sql",
        "CREATE TABLE x (id INTEGER PRIMARY KEY);\n-- ROLLBACK\nDROP TABLE x;\n",
    );
    let runner = MigrationRunner::new(db.clone(), dir.path());

    runner.run().await.unwrap();
    assert!(has_table(&db, "x").await);
    let status = runner.status().await.unwrap();
    assert_eq!(status.migrations[0].state, MigrationState::Applied);
    assert!(status.migrations[0].executed_at.is_some());

    runner.rollback(1).await.unwrap();
    assert!(!has_table(&db, "x").await);
    let status = runner.status().await.unwrap();
    assert_eq!(status.migrations[0].state, MigrationState::Pending);
}

#[tokio::test]
async fn rollback_without_marker_fails_and_keeps_ledger() {
    let db = setup_empty_db().await.unwrap();
    let dir = TempDir::new().unwrap();
    write_migration(&dir, "001_init.sql", "CREATE TABLE x (id INTEGER PRIMARY KEY);\n");
    let runner = MigrationRunner::new(db.clone(), dir.path());
    runner.run().await.unwrap();

    let err = runner.rollback(1).await.unwrap_err();

    assert!(matches!(err, MigrationError::NoRollbackSection { ref name } if name == "001_init.sql"));
    assert!(has_table(&db, "x").await);
    assert_eq!(runner.status().await.unwrap().applied_count(), 1);
}

#[tokio::test]
async fn later_files_apply_after_earlier_ones() {
    let db = setup_empty_db().await.unwrap();
    let dir = TempDir::new().unwrap();
    write_migration(&dir, "20250102_add_index.sql", "CREATE INDEX idx_x_name ON x (name);\n-- ROLLBACK\nDROP INDEX idx_x_name;");
    write_migration(&dir, "20250101_create_x.sql", "CREATE TABLE x (id INTEGER PRIMARY KEY, name TEXT);\n-- ROLLBACK\nDROP TABLE x;");
    let runner = MigrationRunner::new(db.clone(), dir.path());

    let applied = runner.run().await.unwrap();

    assert_eq!(applied, vec!["20250101_create_x.sql", "20250102_add_index.sql"]);

    // A file added later is picked up on the next run.
    write_migration(&dir, "20250103_create_y.sql", "CREATE TABLE y (id INTEGER);");
    assert_eq!(runner.run().await.unwrap(), vec!["20250103_create_y.sql"]);
    assert_eq!(runner.status().await.unwrap().pending_count(), 0);
}

#[tokio::test]
async fn bundled_schema_applies_cleanly() {
    let db = setup_empty_db().await.unwrap();
    let runner = MigrationRunner::new(db.clone(), migrations_dir());

    let before = runner.status().await.unwrap();
    assert_eq!(before.applied_count(), 0);
    assert!(before.pending_count() >= 4);

    runner.run().await.unwrap();

    for table in ["conversations", "messages", "message_reactions", "pending_reads"] {
        assert!(has_table(&db, table).await, "{} missing", table);
    }
    assert_eq!(runner.status().await.unwrap().pending_count(), 0);
}
