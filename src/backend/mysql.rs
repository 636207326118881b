//! Networked mysql backend.
//!
//! Collections carry an explicit `__rowid__` auto-increment column because mysql
//! has no implicit rowid; it drives keyset pagination and is never exposed. The
//! session runs with autocommit off, so writes stay pending until `commit()` or
//! the close path flushes them. Uuid batches are generated server side, one
//! round trip per refill.

use std::cell::RefCell;
use std::rc::Rc;

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{decode, pad_uuid, validate_collection_name, PAGE_SIZE, UUID_BATCH};
use crate::error::{KvError, Result};
use crate::serializer::Serializer;

/// Owns the live mysql connection and the collection lifecycle operations.
pub(crate) struct MysqlConnector {
    conn: Rc<RefCell<Conn>>,
}

impl MysqlConnector {
    /// connects to the server and switches the session out of autocommit
    ///
    /// # Errors
    /// returns [`KvError::Connection`] wrapping the driver error when the server
    /// cannot be reached or rejects the credentials
    pub(crate) fn connect(
        username: &str,
        password: &str,
        host: &str,
        port: u16,
        database: &str,
    ) -> Result<MysqlConnector> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(port)
            .user(Some(username))
            .pass(Some(password))
            .db_name(Some(database));
        let mut conn =
            Conn::new(Opts::from(opts)).map_err(|e| KvError::Connection(Box::new(e)))?;
        // writes must stay pending until an explicit commit
        conn.query_drop("SET autocommit = 0")
            .map_err(|e| KvError::Connection(Box::new(e)))?;
        info!("connected to mysql database {} at {}:{}", database, host, port);
        Ok(MysqlConnector {
            conn: Rc::new(RefCell::new(conn)),
        })
    }

    /// returns the collection (table) names present in the database
    pub(crate) fn collections(&self) -> Result<Vec<String>> {
        let names = self.conn.borrow_mut().query("SHOW TABLES")?;
        Ok(names)
    }

    /// creates the collection if it does not exist yet and commits immediately
    pub(crate) fn create(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let mut conn = self.conn.borrow_mut();
        conn.query_drop(format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             __rowid__ INT NOT NULL AUTO_INCREMENT PRIMARY KEY, \
             k VARCHAR(256) NOT NULL, \
             v MEDIUMBLOB, \
             UNIQUE KEY (k)\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8",
            name
        ))?;
        conn.query_drop("COMMIT")?;
        info!("created collection {}", name);
        Ok(())
    }

    /// drops the collection and commits immediately
    ///
    /// # Errors
    /// returns [`KvError::NoSuchCollection`] if `name` is not in [`collections`]
    ///
    /// [`collections`]: MysqlConnector::collections
    pub(crate) fn remove(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        if !self.collections()?.iter().any(|n| n == name) {
            return Err(KvError::NoSuchCollection(name.to_string()));
        }
        let mut conn = self.conn.borrow_mut();
        conn.query_drop(format!("DROP TABLE {}", name))?;
        conn.query_drop("COMMIT")?;
        info!("removed collection {}", name);
        Ok(())
    }

    /// builds a collection handle bound to this connection and `serializer`
    pub(crate) fn open_collection(
        &self,
        name: &str,
        serializer: Box<dyn Serializer>,
    ) -> Result<MysqlCollection> {
        validate_collection_name(name)?;
        Ok(MysqlCollection {
            conn: Some(Rc::clone(&self.conn)),
            table: name.to_string(),
            serializer,
            uuid_cache: Vec::new(),
        })
    }
}

/// Key-value engine for one mysql-backed collection.
pub(crate) struct MysqlCollection {
    // None once the handle has been closed
    conn: Option<Rc<RefCell<Conn>>>,
    table: String,
    serializer: Box<dyn Serializer>,
    // server-generated ids handed out by get_uuid, consumed from the back
    uuid_cache: Vec<String>,
}

impl MysqlCollection {
    pub(crate) fn name(&self) -> &str {
        &self.table
    }

    pub(crate) fn get(&self, key: &str) -> Result<Option<Value>> {
        let payload: Option<Vec<u8>> = self.conn()?.borrow_mut().exec_first(
            format!("SELECT v FROM {} WHERE k = ?", self.table),
            (key,),
        )?;
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
        self.conn()?.borrow_mut().exec_drop(
            format!(
                "INSERT INTO {} (k, v) VALUES (?, ?) ON DUPLICATE KEY UPDATE v = ?",
                self.table
            ),
            (key, payload.as_slice(), payload.as_slice()),
        )?;
        debug!("put key {}", key);
        Ok(())
    }

    pub(crate) fn delete(&mut self, key: &str) -> Result<()> {
        self.conn()?.borrow_mut().exec_drop(
            format!("DELETE FROM {} WHERE k = ?", self.table),
            (key,),
        )?;
        debug!("deleted key {}", key);
        Ok(())
    }

    pub(crate) fn exists(&self, key: &str) -> Result<bool> {
        let n: Option<i64> = self.conn()?.borrow_mut().exec_first(
            format!("SELECT count(*) FROM {} WHERE k = ?", self.table),
            (key,),
        )?;
        Ok(n.unwrap_or(0) > 0)
    }

    pub(crate) fn count(&self) -> Result<u64> {
        let n: Option<i64> = self
            .conn()?
            .borrow_mut()
            .query_first(format!("SELECT count(*) FROM {}", self.table))?;
        Ok(n.unwrap_or(0) as u64)
    }

    pub(crate) fn keys(&self) -> Result<MysqlKeys<'_>> {
        Ok(MysqlKeys {
            conn: self.conn()?,
            table: &self.table,
            last_rowid: 0,
            batch: Vec::new().into_iter(),
            done: false,
        })
    }

    pub(crate) fn items(&self) -> Result<MysqlItems<'_>> {
        Ok(MysqlItems {
            conn: self.conn()?,
            table: &self.table,
            serializer: self.serializer.as_ref(),
            last_rowid: 0,
            batch: Vec::new().into_iter(),
            done: false,
        })
    }

    /// hands out one server-generated id, asking the server for a fresh batch of
    /// [`UUID_BATCH`] in a single round trip when the cache runs dry
    pub(crate) fn get_uuid(&mut self) -> Result<String> {
        self.conn()?;
        if let Some(id) = self.uuid_cache.pop() {
            return Ok(id);
        }
        let query = vec!["SELECT uuid()"; UUID_BATCH].join(" UNION ALL ");
        let raw: Vec<String> = self.conn()?.borrow_mut().query(query)?;
        self.uuid_cache = raw.iter().map(|u| shuffle_uuid(u)).collect();
        match self.uuid_cache.pop() {
            Some(id) => Ok(id),
            None => Err(KvError::Connection(
                "uuid batch query returned no rows".into(),
            )),
        }
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.conn()?.borrow_mut().query_drop("COMMIT")?;
        Ok(())
    }

    /// commits pending writes and releases this handle's hold on the connection;
    /// closing an already closed handle is a no-op
    pub(crate) fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.borrow_mut().query_drop("COMMIT")?;
            debug!("closed collection {}", self.table);
        }
        Ok(())
    }

    fn conn(&self) -> Result<&RefCell<Conn>> {
        self.conn.as_deref().ok_or(KvError::ClosedHandle)
    }
}

impl Drop for MysqlCollection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("commit on drop failed for collection {}: {}", self.table, e);
        }
    }
}

/// Lazy cursor over the keys of a mysql collection, ascending `__rowid__` order.
pub(crate) struct MysqlKeys<'a> {
    conn: &'a RefCell<Conn>,
    table: &'a str,
    last_rowid: i64,
    batch: std::vec::IntoIter<(i64, String)>,
    done: bool,
}

impl Iterator for MysqlKeys<'_> {
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

/// Lazy cursor over `(key, value)` pairs, ascending `__rowid__` order.
pub(crate) struct MysqlItems<'a> {
    conn: &'a RefCell<Conn>,
    table: &'a str,
    serializer: &'a dyn Serializer,
    last_rowid: i64,
    batch: std::vec::IntoIter<(i64, String, Vec<u8>)>,
    done: bool,
}

impl Iterator for MysqlItems<'_> {
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

fn fetch_key_batch(
    conn: &RefCell<Conn>,
    table: &str,
    last_rowid: i64,
) -> Result<Vec<(i64, String)>> {
    let rows = conn.borrow_mut().exec(
        format!(
            "SELECT __rowid__, k FROM {} WHERE __rowid__ > ? ORDER BY __rowid__ LIMIT {}",
            table, PAGE_SIZE
        ),
        (last_rowid,),
    )?;
    Ok(rows)
}

fn fetch_item_batch(
    conn: &RefCell<Conn>,
    table: &str,
    last_rowid: i64,
) -> Result<Vec<(i64, String, Vec<u8>)>> {
    let rows = conn.borrow_mut().exec(
        format!(
            "SELECT __rowid__, k, v FROM {} WHERE __rowid__ > ? ORDER BY __rowid__ LIMIT {}",
            table, PAGE_SIZE
        ),
        (last_rowid,),
    )?;
    Ok(rows)
}

/// reshapes a server-generated uuid by reversing its dash-delimited groups and
/// zero-padding to the fixed width
///
/// The arrangement is historical; callers may only rely on the ids being unique
/// and exactly forty characters.
fn shuffle_uuid(raw: &str) -> String {
    let mut groups: Vec<&str> = raw.split('-').collect();
    groups.reverse();
    pad_uuid(&groups.concat())
}
