//! SQLite database shared by the credential and trust stores.
//!
//! This module provides:
//! - Schema management and migrations (`PRAGMA user_version`)
//! - A single coarse lock around the connection
//!
//! The two stores own disjoint tables: `saved_connections` and
//! `trusted_hosts`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::error::StoreError;

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Database handle. Every statement runs under one mutex, so writes are
/// serialised.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create a database at the given path.
    ///
    /// Pending migrations are applied before the handle is returned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::IoFailure(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        let mut conn = Self::configure(conn)?;
        run_migrations(&mut conn)?;
        tracing::debug!("Opened credential database at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut conn = Self::configure(conn)?;
        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn configure(conn: Connection) -> Result<Connection, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(conn)
    }

    /// Path of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the current schema version.
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        self.with_conn(|conn| {
            let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            Ok(version)
        })
    }

    /// Runs `f` with exclusive access to the connection.
    ///
    /// The lock is released when `f` returns, whether it succeeded or not.
    pub fn with_conn<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::IoFailure("database lock poisoned".to_string()))?;
        f(&mut conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

/// Run all pending migrations.
fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::IoFailure(format!(
            "database schema version {} is newer than supported version {}",
            current_version, CURRENT_SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Migration to version 1: Initial schema.
fn migrate_v1(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS saved_connections (
            id TEXT PRIMARY KEY,
            operation_type TEXT NOT NULL,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            hostkey TEXT,
            ssh_key_name TEXT,
            ssh_key_contents TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(
        r#"
        CREATE INDEX IF NOT EXISTS idx_saved_connections_name
        ON saved_connections(name)
        "#,
        [],
    )?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS trusted_hosts (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            first_seen INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(&format!("PRAGMA user_version = {}", 1), [])?;

    tx.commit()?;
    tracing::info!("Migrated credential database to schema version 1");
    Ok(())
}

/// Current time as Unix seconds.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(db.path().is_none());
    }

    #[test]
    fn test_open_file_creates_parent_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("netvault.db");

        let db = Database::open(&db_path).expect("Failed to open database");
        assert!(db_path.exists());
        assert_eq!(db.path(), Some(db_path.as_path()));
    }

    #[test]
    fn test_reopen_does_not_rerun_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("netvault.db");

        {
            let db = Database::open(&db_path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO trusted_hosts (id, fingerprint, first_seen, updated_at) VALUES ('x', 'aa', 1, 1)",
                    [],
                )?;
                Ok::<_, StoreError>(())
            })
            .unwrap();
        }

        let db = Database::open(&db_path).unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok::<_, StoreError>(conn.query_row(
                    "SELECT COUNT(*) FROM trusted_hosts",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_tables_exist() {
        let db = Database::open_in_memory().unwrap();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok::<_, StoreError>(names)
            })
            .unwrap();

        assert!(tables.contains(&"saved_connections".to_string()));
        assert!(tables.contains(&"trusted_hosts".to_string()));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("future.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("PRAGMA user_version = 99", []).unwrap();
        }

        assert!(matches!(
            Database::open(&db_path),
            Err(StoreError::IoFailure(_))
        ));
    }
}
