//! Embedded libSQL backend.

use std::path::Path;

use async_trait::async_trait;
use libsql::{Connection, Database};

use crate::error::StoreError;
use crate::store::KvStore;

pub struct LibSqlStore {
    _db: Database,
    // In-memory databases are per-connection, so one connection is reused.
    conn: Connection,
    location: String,
}

impl LibSqlStore {
    /// Open (or create) a database file and ensure the key-value table exists.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                path: path.display().to_string(),
                reason: format!("failed to create database directory: {e}"),
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::init(db, path.display().to_string()).await
    }

    /// Create an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open {
                path: ":memory:".to_string(),
                reason: e.to_string(),
            })?;
        Self::init(db, ":memory:".to_string()).await
    }

    async fn init(db: Database, location: String) -> Result<Self, StoreError> {
        let conn = db.connect()?;
        // Concurrent writers wait instead of failing with "database is locked".
        conn.query("PRAGMA busy_timeout = 5000", ()).await?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS studio_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            (),
        )
        .await?;
        Ok(Self {
            _db: db,
            conn,
            location,
        })
    }
}

#[async_trait]
impl KvStore for LibSqlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM studio_kv WHERE key = ?1",
                libsql::params![key],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO studio_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                libsql::params![key, value, now],
            )
            .await
            .map_err(|e| StoreError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM studio_kv WHERE key = ?1", libsql::params![key])
            .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("libsql:{}", self.location)
    }
}
