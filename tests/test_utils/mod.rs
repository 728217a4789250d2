//! Test utilities for database and webhook testing.
//!
//! Sets up in-memory SQLite databases with the bundled SQL migrations applied
//! and builds signed webhook deliveries.

use std::path::PathBuf;

use anyhow::Result;
use sea_orm::DatabaseConnection;
use social_selling::{
    config::AppConfig,
    db::init_pool,
    migrator::MigrationRunner,
    webhook_verification::{SignatureAlgorithm, sign},
};

#[allow(dead_code)]
pub const TEST_SECRET: &str = "integration-secret";

/// Directory holding the bundled migrations.
#[allow(dead_code)]
pub fn migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

/// Test configuration backed by an in-memory SQLite database.
#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        instagram_app_secret: Some(TEST_SECRET.to_string()),
        ..Default::default()
    }
}

/// Connects to a fresh in-memory database without applying migrations.
#[allow(dead_code)]
pub async fn setup_empty_db() -> Result<DatabaseConnection> {
    init_pool(&test_config()).await
}

/// Sets up an in-memory SQLite database with all migrations applied.
#[allow(dead_code)]
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = setup_empty_db().await?;
    MigrationRunner::new(db.clone(), migrations_dir())
        .run()
        .await?;
    Ok(db)
}

/// `X-Hub-Signature-256` value for `body` under the test secret.
#[allow(dead_code)]
pub fn signature_for(body: &str) -> String {
    sign(SignatureAlgorithm::Sha256, body.as_bytes(), TEST_SECRET)
}

/// Envelope with a single entry for account `A`.
#[allow(dead_code)]
pub fn envelope(messaging: serde_json::Value) -> String {
    serde_json::json!({
        "object": "instagram",
        "entry": [{"id": "A", "time": 1000, "messaging": messaging}]
    })
    .to_string()
}
