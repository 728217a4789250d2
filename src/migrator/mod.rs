//! # Migration Runner
//!
//! Applies and reverts the SQL files in a migrations directory against the
//! database, tracking applied files in the `migrations` ledger table.
//!
//! Each file is applied (or reverted) together with its ledger row in one
//! transaction, so a ledger row exists exactly for the files whose forward
//! section is in effect. A failure stops the sequence; files already handled
//! stay committed. The runner assumes a single operator at a time.

pub mod sql_file;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr,
    EntityTrait, ModelTrait, QueryFilter, QueryOrder, QuerySelect, Schema, Set, Statement,
    TransactionTrait,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::models::migration_record::{self, Entity as MigrationRecord};

pub use sql_file::{MigrationFile, ROLLBACK_MARKER, discover};

const LEDGER_TABLE: &str = "migrations";

/// Errors raised by the migration runner.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid migration file {name}: {reason}")]
    MigrationFileInvalid { name: String, reason: String },
    #[error("migration {name} has no rollback section")]
    NoRollbackSection { name: String },
    #[error("applied migration {name} has no file in {dir}")]
    MigrationFileMissing { name: String, dir: PathBuf },
    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: DbErr,
    },
}

impl MigrationError {
    fn database(context: impl Into<String>, source: DbErr) -> Self {
        MigrationError::Database {
            context: context.into(),
            source,
        }
    }
}

/// Whether a discovered file is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MigrationState {
    Applied,
    Pending,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            MigrationState::Applied => "APPLIED",
            MigrationState::Pending => "PENDING",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusEntry {
    pub name: String,
    pub state: MigrationState,
    pub executed_at: Option<DateTimeWithTimeZone>,
}

/// Result of [`MigrationRunner::status`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// Every discovered file, in apply order
    pub migrations: Vec<MigrationStatusEntry>,
    /// Ledger rows whose file is no longer in the directory
    pub orphaned: Vec<String>,
}

impl StatusReport {
    pub fn applied_count(&self) -> usize {
        self.count(MigrationState::Applied)
    }

    pub fn pending_count(&self) -> usize {
        self.count(MigrationState::Pending)
    }

    fn count(&self, state: MigrationState) -> usize {
        self.migrations.iter().filter(|m| m.state == state).count()
    }
}

/// Runs SQL file migrations from one directory against one database.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    db: DatabaseConnection,
    dir: PathBuf,
}

impl MigrationRunner {
    pub fn new(db: DatabaseConnection, dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Applies every pending file in name order.
    ///
    /// All pending files are parsed before any is applied, so an invalid file
    /// fails the run without touching the schema. Returns the applied names.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn run(&self) -> Result<Vec<String>, MigrationError> {
        self.ensure_ledger().await?;

        let applied: HashSet<String> = self
            .applied_records()
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();

        let pending = discover(&self.dir)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_none_or(|name| !applied.contains(name))
            })
            .map(|path| MigrationFile::load(&path))
            .collect::<Result<Vec<_>, _>>()?;

        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(Vec::new());
        }

        let mut done = Vec::with_capacity(pending.len());
        for file in pending {
            self.apply(&file).await?;
            done.push(file.name);
        }

        info!(count = done.len(), "Applied migrations");
        Ok(done)
    }

    /// Reverts the `steps` most recently applied migrations, newest first.
    ///
    /// Every targeted file must exist and carry a rollback section; this is
    /// checked before anything is reverted. Returns the reverted names.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn rollback(&self, steps: usize) -> Result<Vec<String>, MigrationError> {
        self.ensure_ledger().await?;

        let targets = MigrationRecord::find()
            .order_by_desc(migration_record::Column::Id)
            .limit(steps as u64)
            .all(&self.db)
            .await
            .map_err(|e| MigrationError::database("failed to read migration ledger", e))?;

        if targets.is_empty() {
            info!("Nothing to roll back");
            return Ok(Vec::new());
        }

        let mut plan = Vec::with_capacity(targets.len());
        for record in targets {
            let path = self.dir.join(&record.name);
            if !path.is_file() {
                return Err(MigrationError::MigrationFileMissing {
                    name: record.name,
                    dir: self.dir.clone(),
                });
            }

            let file = MigrationFile::load(&path)?;
            file.rollback_sql()?;
            plan.push((record, file));
        }

        let mut reverted = Vec::with_capacity(plan.len());
        for (record, file) in plan {
            self.revert(record, &file).await?;
            reverted.push(file.name);
        }

        info!(count = reverted.len(), "Rolled back migrations");
        Ok(reverted)
    }

    /// Reports every discovered file as applied or pending.
    ///
    /// Read-only: a database without a ledger reports everything pending and
    /// the ledger is not created.
    pub async fn status(&self) -> Result<StatusReport, MigrationError> {
        let mut records: BTreeMap<String, migration_record::Model> = if self.ledger_exists().await?
        {
            self.applied_records()
                .await?
                .into_iter()
                .map(|record| (record.name.clone(), record))
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut report = StatusReport::default();
        for path in discover(&self.dir)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let entry = match records.remove(&name) {
                Some(record) => MigrationStatusEntry {
                    name,
                    state: MigrationState::Applied,
                    executed_at: Some(record.executed_at),
                },
                None => MigrationStatusEntry {
                    name,
                    state: MigrationState::Pending,
                    executed_at: None,
                },
            };
            report.migrations.push(entry);
        }

        report.orphaned = records.into_keys().collect();
        if !report.orphaned.is_empty() {
            warn!(orphaned = ?report.orphaned, "Ledger lists migrations with no file");
        }

        Ok(report)
    }

    /// Creates the ledger table if it does not exist.
    pub async fn ensure_ledger(&self) -> Result<(), MigrationError> {
        let backend = self.db.get_database_backend();
        let mut create = Schema::new(backend).create_table_from_entity(MigrationRecord);
        create.if_not_exists();

        self.db
            .execute(backend.build(&create))
            .await
            .map_err(|e| MigrationError::database("failed to create migration ledger", e))?;

        Ok(())
    }

    pub async fn ledger_exists(&self) -> Result<bool, MigrationError> {
        let backend = self.db.get_database_backend();
        let sql = match backend {
            DatabaseBackend::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?"
            }
            DatabaseBackend::Postgres => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
            DatabaseBackend::MySql => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
        };

        let row = self
            .db
            .query_one(Statement::from_sql_and_values(
                backend,
                sql,
                [LEDGER_TABLE.into()],
            ))
            .await
            .map_err(|e| MigrationError::database("failed to inspect schema", e))?;

        Ok(row.is_some())
    }

    async fn applied_records(&self) -> Result<Vec<migration_record::Model>, MigrationError> {
        MigrationRecord::find()
            .order_by_asc(migration_record::Column::Id)
            .all(&self.db)
            .await
            .map_err(|e| MigrationError::database("failed to read migration ledger", e))
    }

    async fn apply(&self, file: &MigrationFile) -> Result<(), MigrationError> {
        info!(migration = %file.name, "Applying migration");
        let failed = |e| MigrationError::database(format!("migration {} failed", file.name), e);

        let txn = self.db.begin().await.map_err(failed)?;
        txn.execute_unprepared(&file.up_sql).await.map_err(failed)?;

        migration_record::ActiveModel {
            name: Set(file.name.clone()),
            file: Set(file.path.display().to_string()),
            executed_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(failed)?;

        txn.commit().await.map_err(failed)?;
        info!(migration = %file.name, "Applied migration");
        Ok(())
    }

    async fn revert(
        &self,
        record: migration_record::Model,
        file: &MigrationFile,
    ) -> Result<(), MigrationError> {
        info!(migration = %file.name, "Rolling back migration");
        let failed =
            |e| MigrationError::database(format!("rollback of {} failed", file.name), e);

        let down_sql = file.rollback_sql()?;
        let txn = self.db.begin().await.map_err(failed)?;
        txn.execute_unprepared(down_sql).await.map_err(failed)?;
        record.delete(&txn).await.map_err(failed)?;
        txn.commit().await.map_err(failed)?;

        info!(migration = %file.name, "Rolled back migration");
        Ok(())
    }

    /// Whether the named file is recorded as applied.
    pub async fn is_applied(&self, name: &str) -> Result<bool, MigrationError> {
        if !self.ledger_exists().await? {
            return Ok(false);
        }

        let found = MigrationRecord::find()
            .filter(migration_record::Column::Name.eq(name))
            .one(&self.db)
            .await
            .map_err(|e| MigrationError::database("failed to read migration ledger", e))?;

        Ok(found.is_some())
    }
}
