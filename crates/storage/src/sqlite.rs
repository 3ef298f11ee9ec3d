#![forbid(unsafe_code)]

use crate::{ObjectStore, StoreError, validate_key};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DB_FILE: &str = "objects.db";

/// Object store kept in a single SQLite file under a storage directory.
#[derive(Debug)]
pub struct SqliteObjectStore {
    conn: Mutex<Connection>,
    storage_dir: PathBuf,
}

impl SqliteObjectStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        install_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            storage_dir,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS objects (
          bucket TEXT NOT NULL,
          key TEXT NOT NULL,
          body BLOB NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (bucket, key)
        );
        "#,
    )?;
    Ok(())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(i64::MAX as u128) as i64
}

impl ObjectStore for SqliteObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT body FROM objects WHERE bucket=?1 AND key=?2",
            params![bucket, key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO objects(bucket, key, body, updated_at_ms) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(bucket, key) DO UPDATE SET body=excluded.body, updated_at_ms=excluded.updated_at_ms",
            params![bucket, key, body, now_ms()],
        )?;
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM objects \
             WHERE bucket=?1 AND substr(key, 1, length(?2))=?2 \
             ORDER BY key ASC",
        )?;
        let mut rows = stmt.query(params![bucket, prefix])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, String>(0)?);
        }
        Ok(out)
    }

    fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        validate_key(dst_key)?;
        let conn = self.conn()?;
        let copied = conn.execute(
            "INSERT INTO objects(bucket, key, body, updated_at_ms) \
             SELECT ?3, ?4, body, ?5 FROM objects WHERE bucket=?1 AND key=?2 \
             ON CONFLICT(bucket, key) DO UPDATE SET body=excluded.body, updated_at_ms=excluded.updated_at_ms",
            params![src_bucket, src_key, dst_bucket, dst_key, now_ms()],
        )?;
        if copied == 0 {
            return Err(StoreError::not_found(src_bucket, src_key));
        }
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM objects WHERE bucket=?1 AND key=?2",
            params![bucket, key],
        )?;
        Ok(())
    }
}
