//! SQL migration files.
//!
//! A migration is a `.sql` file holding forward statements, optionally
//! followed by a line reading `-- ROLLBACK` and the statements that undo them.
//! Files apply in lexicographic order of their names, so names carry a
//! sortable timestamp prefix.

use std::path::{Path, PathBuf};

use super::MigrationError;

/// Line separating forward from rollback statements.
pub const ROLLBACK_MARKER: &str = "-- ROLLBACK";

/// A parsed migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, used as the ledger key
    pub name: String,
    pub path: PathBuf,
    pub up_sql: String,
    /// `None` when the file has no rollback marker
    pub down_sql: Option<String>,
}

impl MigrationFile {
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let name = file_name(path)?;
        let contents = std::fs::read_to_string(path).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(name, path.to_path_buf(), &contents)
    }

    /// Splits `contents` at the first rollback marker line.
    pub fn parse(name: String, path: PathBuf, contents: &str) -> Result<Self, MigrationError> {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut has_marker = false;

        for line in contents.lines() {
            if has_marker {
                down.push(line);
            } else if line.trim() == ROLLBACK_MARKER {
                has_marker = true;
            } else {
                up.push(line);
            }
        }

        let up_sql = up.join("\n").trim().to_string();
        if !has_statements(&up_sql) {
            return Err(MigrationError::MigrationFileInvalid {
                name,
                reason: "forward section is empty".to_string(),
            });
        }

        let down_sql = has_marker.then(|| down.join("\n").trim().to_string());

        Ok(Self {
            name,
            path,
            up_sql,
            down_sql,
        })
    }

    /// The rollback SQL, or [`MigrationError::NoRollbackSection`].
    pub fn rollback_sql(&self) -> Result<&str, MigrationError> {
        self.down_sql
            .as_deref()
            .filter(|sql| has_statements(sql))
            .ok_or_else(|| MigrationError::NoRollbackSection {
                name: self.name.clone(),
            })
    }
}

/// Whether the SQL holds anything besides whitespace and `--` comments.
fn has_statements(sql: &str) -> bool {
    sql.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("--")
    })
}

fn file_name(path: &Path) -> Result<String, MigrationError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| MigrationError::MigrationFileInvalid {
            name: path.display().to_string(),
            reason: "file name is not valid UTF-8".to_string(),
        })
}

/// Lists `.sql` files directly under `dir`, sorted by file name.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, MigrationError> {
    let io_err = |source| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
