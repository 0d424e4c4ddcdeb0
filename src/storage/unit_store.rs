//! Unit store - SQLite database holding one bucket per persisted hour.
//!
//! # Schema
//! ```text
//! units(key BLOB PRIMARY KEY, record BLOB NOT NULL)
//!   key:    4-byte big-endian unit id
//!   record: codec-encoded UnitRecord
//! ```
//!
//! SQLite compares BLOB keys with memcmp, so iterating by key visits units
//! in chronological order.

use parking_lot::Mutex;
use rusqlite::{
    params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::codec;
use super::types::StoreStats;
use crate::error::{Result, StatsError};
use crate::retention::{id_to_key, key_to_id, UnitId};
use crate::unit::UnitRecord;

const FS_HINT: &str = "the statistics database cannot be created on this file system; \
    move the data directory to a local disk that supports file locking";

/// Persistent store of hourly units.
pub struct UnitStore {
    /// Path to database file
    path: PathBuf,

    /// Single connection, serialized by the mutex
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for UnitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitStore").field("path", &self.path).finish()
    }
}

/// Operations available inside a store transaction.
pub struct StoreTxn<'a> {
    conn: &'a Connection,
}

impl UnitStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let open_err = |reason: String| StatsError::StoreOpen {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| open_err(format!("failed to create directory: {}", e)))?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| open_err(describe_open_error(&e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS units (
                key BLOB PRIMARY KEY,
                record BLOB NOT NULL
            ) WITHOUT ROWID;",
        )
        .map_err(|e| open_err(describe_open_error(&e)))?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing store without write access. Nothing is created:
    /// a missing file is an error and every write transaction fails.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StatsError::StoreOpen {
            path: path.clone(),
            reason: describe_open_error(&e),
        })?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` inside a write transaction. The transaction commits when `f`
    /// returns `Ok` and rolls back otherwise.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTxn<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let out = f(&StoreTxn { conn: &tx })?;

        tx.commit()?;
        Ok(out)
    }

    /// Runs `f` inside a read transaction that is always rolled back.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTxn<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;

        let out = f(&StoreTxn { conn: &tx });

        tx.rollback()?;
        out
    }

    /// Returns bucket statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let ids = self.view(|tx| tx.bucket_ids())?;

        Ok(StoreStats {
            path: self.path.clone(),
            buckets: ids.len() as u64,
            oldest: ids.first().copied(),
            newest: ids.last().copied(),
        })
    }

    /// Closes the connection.
    pub fn close(self) -> Result<()> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, e)| StatsError::Store(e))
    }

    /// Deletes the database file and any rollback journal left beside it.
    pub fn remove_files<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let mut journal = path.as_os_str().to_owned();
        journal.push("-journal");

        for file in [path.to_path_buf(), PathBuf::from(journal)] {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

impl StoreTxn<'_> {
    /// Loads the record of a unit, if persisted.
    pub fn get(&self, id: UnitId) -> Result<Option<UnitRecord>> {
        let key = id_to_key(id);
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT record FROM units WHERE key = ?1",
                params![&key[..]],
                |row| row.get(0),
            )
            .optional()?;

        bytes.map(|b| codec::decode(&b)).transpose()
    }

    /// Stores the record of a unit, replacing any previous one.
    pub fn put(&self, id: UnitId, record: &UnitRecord) -> Result<()> {
        let key = id_to_key(id);
        let bytes = codec::encode(record)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO units (key, record) VALUES (?1, ?2)",
            params![&key[..], bytes],
        )?;

        Ok(())
    }

    /// Deletes the bucket of a unit. Fails with
    /// [`StatsError::BucketNotFound`] when no such bucket exists.
    pub fn delete_bucket(&self, id: UnitId) -> Result<()> {
        let key = id_to_key(id);
        let deleted = self
            .conn
            .execute("DELETE FROM units WHERE key = ?1", params![&key[..]])?;

        if deleted == 0 {
            return Err(StatsError::BucketNotFound(id));
        }

        Ok(())
    }

    /// Ids of all persisted units, oldest first.
    pub fn bucket_ids(&self) -> Result<Vec<UnitId>> {
        let mut stmt = self.conn.prepare("SELECT key FROM units ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(keys.iter().filter_map(|k| key_to_id(k)).collect())
    }
}

fn describe_open_error(e: &rusqlite::Error) -> String {
    match e.sqlite_error_code() {
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::FileLockingProtocolFailed) => {
            format!("{} ({})", e, FS_HINT)
        }
        _ => e.to_string(),
    }
}
