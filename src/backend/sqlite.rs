//! Embedded sqlite backend.
//!
//! Collections are plain tables of `(k, v)` pairs; sqlite's implicit `rowid` is the
//! monotonic identifier that drives keyset pagination and is never exposed to
//! callers. The driver connection starts in autocommit mode, so the collection
//! opens a deferred transaction before its first pending write and leaves the
//! commit to `commit()` or the close path.

use std::rc::Rc;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{decode, pad_uuid, validate_collection_name, PAGE_SIZE, UUID_BATCH};
use crate::error::{KvError, Result};
use crate::serializer::Serializer;

/// Owns the live sqlite connection and the collection lifecycle operations.
///
/// The connection is shared (reference counted) with every collection handle opened
/// through it; it is physically closed once the last holder goes away.
pub(crate) struct SqliteConnector {
    conn: Rc<Connection>,
}

impl SqliteConnector {
    /// opens `database`, creating the file if it does not exist yet
    ///
    /// # Errors
    /// returns [`KvError::Connection`] wrapping the driver error when the file
    /// cannot be opened
    pub(crate) fn connect(database: &str) -> Result<SqliteConnector> {
        let conn = Connection::open(database).map_err(|e| KvError::Connection(Box::new(e)))?;
        info!("opened sqlite database {}", database);
        Ok(SqliteConnector {
            conn: Rc::new(conn),
        })
    }

    /// returns the collection (table) names present in the database, sorted
    pub(crate) fn collections(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// creates the collection if it does not exist yet and commits immediately
    pub(crate) fn create(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (k TEXT UNIQUE NOT NULL, v BLOB)",
            name
        ))?;
        self.commit()?;
        info!("created collection {}", name);
        Ok(())
    }

    /// drops the collection and commits immediately
    ///
    /// # Errors
    /// returns [`KvError::NoSuchCollection`] if `name` is not in [`collections`]
    ///
    /// [`collections`]: SqliteConnector::collections
    pub(crate) fn remove(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        if !self.collections()?.iter().any(|n| n == name) {
            return Err(KvError::NoSuchCollection(name.to_string()));
        }
        self.conn.execute_batch(&format!("DROP TABLE {}", name))?;
        self.commit()?;
        info!("removed collection {}", name);
        Ok(())
    }

    /// builds a collection handle bound to this connection and `serializer`
    pub(crate) fn open_collection(
        &self,
        name: &str,
        serializer: Box<dyn Serializer>,
    ) -> Result<SqliteCollection> {
        validate_collection_name(name)?;
        Ok(SqliteCollection {
            conn: Some(Rc::clone(&self.conn)),
            table: name.to_string(),
            serializer,
            uuid_cache: Vec::new(),
        })
    }

    // collection create/remove take effect immediately, even when a sibling
    // collection handle has a transaction open on the shared connection
    fn commit(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

/// Key-value engine for one sqlite-backed collection.
pub(crate) struct SqliteCollection {
    // None once the handle has been closed
    conn: Option<Rc<Connection>>,
    table: String,
    serializer: Box<dyn Serializer>,
    // pre-generated ids handed out by get_uuid, consumed from the back
    uuid_cache: Vec<String>,
}

impl SqliteCollection {
    pub(crate) fn name(&self) -> &str {
        &self.table
    }

    pub(crate) fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!("SELECT v FROM {} WHERE k = ?1", self.table))?;
        let payload: Option<Vec<u8>> = stmt
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        match payload {
            Some(bytes) => Ok(Some(decode(self.serializer.as_ref(), key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put(&mut self, key: &str, value: &Value) -> Result<()> {
        let payload = self
            .serializer
            .encode(value)
            .map_err(|e| KvError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        let conn = self.begin_write()?;
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR REPLACE INTO {} (k, v) VALUES (?1, ?2)",
            self.table
        ))?;
        stmt.execute(params![key, payload])?;
        debug!("put key {}", key);
        Ok(())
    }

    pub(crate) fn delete(&mut self, key: &str) -> Result<()> {
        let conn = self.begin_write()?;
        let mut stmt = conn.prepare_cached(&format!("DELETE FROM {} WHERE k = ?1", self.table))?;
        stmt.execute(params![key])?;
        debug!("deleted key {}", key);
        Ok(())
    }

    pub(crate) fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT count(*) FROM {} WHERE k = ?1", self.table))?;
        let n: i64 = stmt.query_row(params![key], |row| row.get(0))?;
        Ok(n > 0)
    }

    pub(crate) fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!("SELECT count(*) FROM {}", self.table))?;
        let n: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub(crate) fn keys(&self) -> Result<SqliteKeys<'_>> {
        Ok(SqliteKeys {
            conn: self.conn()?,
            table: &self.table,
            last_rowid: 0,
            batch: Vec::new().into_iter(),
            done: false,
        })
    }

    pub(crate) fn items(&self) -> Result<SqliteItems<'_>> {
        Ok(SqliteItems {
            conn: self.conn()?,
            table: &self.table,
            serializer: self.serializer.as_ref(),
            last_rowid: 0,
            batch: Vec::new().into_iter(),
            done: false,
        })
    }

    pub(crate) fn get_uuid(&mut self) -> Result<String> {
        self.conn()?;
        if let Some(id) = self.uuid_cache.pop() {
            return Ok(id);
        }
        self.uuid_cache.extend((0..UUID_BATCH - 1).map(|_| new_uuid()));
        Ok(new_uuid())
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// commits pending writes and releases this handle's hold on the connection;
    /// closing an already closed handle is a no-op
    pub(crate) fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            debug!("closed collection {}", self.table);
        }
        Ok(())
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_deref().ok_or(KvError::ClosedHandle)
    }

    // opens the deferred transaction that commit() or the close path will flush
    fn begin_write(&self) -> Result<&Connection> {
        let conn = self.conn()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(conn)
    }
}

impl Drop for SqliteCollection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("commit on drop failed for collection {}: {}", self.table, e);
        }
    }
}

/// Lazy cursor over the keys of a sqlite collection, ascending rowid order.
///
/// Fetches rows in batches of [`PAGE_SIZE`], remembering the last rowid seen, and
/// stops for good once a fetch comes back empty.
pub(crate) struct SqliteKeys<'a> {
    conn: &'a Connection,
    table: &'a str,
    last_rowid: i64,
    batch: std::vec::IntoIter<(i64, String)>,
    done: bool,
}

impl Iterator for SqliteKeys<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((rowid, key)) = self.batch.next() {
                self.last_rowid = rowid;
                return Some(Ok(key));
            }
            match fetch_key_batch(self.conn, self.table, self.last_rowid) {
                Ok(batch) if batch.is_empty() => {
                    self.done = true;
                    return None;
                }
                Ok(batch) => self.batch = batch.into_iter(),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Lazy cursor over `(key, value)` pairs, ascending rowid order.
///
/// Values are decoded one at a time as the cursor advances; a payload the bound
/// serializer cannot decode ends the iteration with the error.
pub(crate) struct SqliteItems<'a> {
    conn: &'a Connection,
    table: &'a str,
    serializer: &'a dyn Serializer,
    last_rowid: i64,
    batch: std::vec::IntoIter<(i64, String, Vec<u8>)>,
    done: bool,
}

impl Iterator for SqliteItems<'_> {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((rowid, key, payload)) = self.batch.next() {
                self.last_rowid = rowid;
                return Some(match decode(self.serializer, &key, &payload) {
                    Ok(value) => Ok((key, value)),
                    Err(e) => {
                        self.done = true;
                        Err(e)
                    }
                });
            }
            match fetch_item_batch(self.conn, self.table, self.last_rowid) {
                Ok(batch) if batch.is_empty() => {
                    self.done = true;
                    return None;
                }
                Ok(batch) => self.batch = batch.into_iter(),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn fetch_key_batch(conn: &Connection, table: &str, last_rowid: i64) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT rowid, k FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT {}",
        table, PAGE_SIZE
    ))?;
    let rows = stmt
        .query_map(params![last_rowid], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<(i64, String)>, _>>()?;
    Ok(rows)
}

fn fetch_item_batch(
    conn: &Connection,
    table: &str,
    last_rowid: i64,
) -> Result<Vec<(i64, String, Vec<u8>)>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT rowid, k, v FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT {}",
        table, PAGE_SIZE
    ))?;
    let rows = stmt
        .query_map(params![last_rowid], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<(i64, String, Vec<u8>)>, _>>()?;
    Ok(rows)
}

/// a client-side random id: v4 uuid hex with the hyphens stripped, zero-padded
/// to the fixed width
fn new_uuid() -> String {
    pad_uuid(&Uuid::new_v4().simple().to_string())
}
