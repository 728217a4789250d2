//! The `migrate` binary against a file-backed SQLite database.

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("migrations")).unwrap();
        fs::write(
            root.path().join("migrations/001_init.sql"),
            "CREATE TABLE x (id INTEGER PRIMARY KEY);\n-- ROLLBACK\nDROP TABLE x;\n",
        )
        .unwrap();
        Self { root }
    }

    fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.root.path().join("cli.db").display())
    }

    fn migrate(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        Command::cargo_bin("migrate")
            .unwrap()
            .current_dir(self.root.path())
            .env_remove("RUST_LOG")
            .env("SOCIAL_PROFILE", "test")
            .env("SOCIAL_DATABASE_URL", self.database_url())
            .env("SOCIAL_MIGRATIONS_DIR", "migrations")
            .args(args)
            .assert()
    }
}

fn stdout(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

#[test]
fn run_status_rollback_cycle() {
    let workspace = Workspace::new();

    let status = workspace.migrate(&["status"]).success();
    assert!(stdout(&status).contains("PENDING  001_init.sql"));

    let run = workspace.migrate(&["run"]).success();
    assert!(stdout(&run).contains("1 migration(s) applied"));

    let status = workspace.migrate(&["status"]).success();
    let output = stdout(&status);
    assert!(output.contains("APPLIED  001_init.sql"));
    assert!(output.contains("1 applied, 0 pending"));

    let rollback = workspace.migrate(&["rollback"]).success();
    assert!(stdout(&rollback).contains("1 migration(s) rolled back"));
}

#[test]
fn failing_migration_exits_non_zero() {
    let workspace = Workspace::new();
    fs::write(
        workspace.root.path().join("migrations/002_broken.sql"),
        "INSERT INTO no_such_table VALUES (1);",
    )
    .unwrap();

    workspace.migrate(&["run"]).failure();

    let status = workspace.migrate(&["status"]).success();
    let output = stdout(&status);
    assert!(output.contains("APPLIED  001_init.sql"));
    assert!(output.contains("PENDING  002_broken.sql"));
}

#[test]
fn rollback_rejects_zero_steps() {
    let workspace = Workspace::new();
    workspace.migrate(&["rollback", "0"]).failure();
}

#[test]
fn cli_flags_override_configuration() {
    let workspace = Workspace::new();
    let other = TempDir::new().unwrap();
    fs::write(other.path().join("001_other.sql"), "CREATE TABLE other (id INTEGER);").unwrap();

    let status = workspace
        .migrate(&["--dir", other.path().to_str().unwrap(), "status"])
        .success();

    assert!(stdout(&status).contains("001_other.sql"));
}
