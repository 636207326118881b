//! The public collection handle and its iterators.
//!
//! A [`Collection`] wraps whichever backend engine the manager picked at
//! construction time; every operation dispatches on that tag. Key length is
//! enforced here, before any statement runs, so an oversize key can never leave
//! partial state behind in either backend.

use std::fmt;

use serde_json::Value;

#[cfg(feature = "mysql")]
use crate::backend::mysql::{MysqlCollection, MysqlItems, MysqlKeys};
#[cfg(feature = "sqlite")]
use crate::backend::sqlite::{SqliteCollection, SqliteItems, SqliteKeys};
use crate::error::{KvError, Result};

/// longest key a collection accepts, in bytes
pub const MAX_KEY_LEN: usize = 40;

/// A handle to one collection: a single backend table accessed with key-value
/// semantics.
///
/// Handles are obtained from [`open`] or [`CollectionManager::open_collection`]
/// and hold a shared reference to the manager's connection. Writes stay pending
/// until [`commit`] runs; [`close`] commits and then releases the connection, and
/// dropping an open handle does the same. Once closed, every other operation
/// fails with [`KvError::ClosedHandle`].
///
/// [`open`]: crate::open
/// [`CollectionManager::open_collection`]: crate::CollectionManager::open_collection
/// [`commit`]: Collection::commit
/// [`close`]: Collection::close
pub struct Collection {
    inner: Inner,
}

enum Inner {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteCollection),
    #[cfg(feature = "mysql")]
    Mysql(MysqlCollection),
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

impl Collection {
    #[cfg(feature = "sqlite")]
    pub(crate) fn from_sqlite(engine: SqliteCollection) -> Collection {
        Collection {
            inner: Inner::Sqlite(engine),
        }
    }

    #[cfg(feature = "mysql")]
    pub(crate) fn from_mysql(engine: MysqlCollection) -> Collection {
        Collection {
            inner: Inner::Mysql(engine),
        }
    }

    /// the name of the backend table this handle reads and writes
    pub fn name(&self) -> &str {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.name(),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.name(),
        }
    }

    /// looks up the value stored under `key`
    ///
    /// Returns `Ok(None)` if the key is absent.
    ///
    /// # Errors
    /// returns [`KvError::Deserialization`] if the stored payload does not match
    /// the serializer this handle was opened with
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        check_key(key)?;
        match &self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.get(key),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.get(key),
        }
    }

    /// stores `value` under `key`, overwriting any existing value in a single
    /// upsert statement
    ///
    /// The write stays pending until [`commit`](Collection::commit) or the close
    /// path flushes it.
    pub fn put(&mut self, key: &str, value: &Value) -> Result<()> {
        check_key(key)?;
        match &mut self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.put(key, value),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.put(key, value),
        }
    }

    /// removes the row stored under `key`; deleting an absent key is a no-op
    pub fn delete(&mut self, key: &str) -> Result<()> {
        check_key(key)?;
        match &mut self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.delete(key),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.delete(key),
        }
    }

    /// reports whether a row is stored under `key`
    pub fn exists(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        match &self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.exists(key),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.exists(key),
        }
    }

    /// the number of rows currently in the collection
    pub fn count(&self) -> Result<u64> {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.count(),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.count(),
        }
    }

    /// returns a lazy iterator over every key, in insertion (row id) order
    ///
    /// The iterator fetches rows in pages and is not restartable; build a new one
    /// to walk the collection again. Rows appended behind the cursor by another
    /// connection are not revisited.
    pub fn keys(&self) -> Result<Keys<'_>> {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => Ok(Keys {
                inner: KeysInner::Sqlite(c.keys()?),
            }),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => Ok(Keys {
                inner: KeysInner::Mysql(c.keys()?),
            }),
        }
    }

    /// returns a lazy iterator over every `(key, value)` pair, in insertion
    /// (row id) order
    ///
    /// Values are decoded as the iterator advances; a payload the bound serializer
    /// cannot decode ends the iteration with [`KvError::Deserialization`].
    pub fn items(&self) -> Result<Items<'_>> {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => Ok(Items {
                inner: ItemsInner::Sqlite(c.items()?),
            }),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => Ok(Items {
                inner: ItemsInner::Mysql(c.items()?),
            }),
        }
    }

    /// returns one unique forty-character identifier, suitable as a key
    ///
    /// Identifiers are pre-generated in batches of one hundred and handed out one
    /// at a time, so most calls are satisfied from memory.
    pub fn get_uuid(&mut self) -> Result<String> {
        match &mut self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.get_uuid(),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.get_uuid(),
        }
    }

    /// commits the pending writes made through this handle's connection
    pub fn commit(&mut self) -> Result<()> {
        match &mut self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.commit(),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.commit(),
        }
    }

    /// commits pending writes, then releases this handle's hold on the connection
    ///
    /// Closing an already closed handle is a no-op. Dropping an open handle runs
    /// the same path, logging (instead of returning) any commit failure.
    pub fn close(&mut self) -> Result<()> {
        match &mut self.inner {
            #[cfg(feature = "sqlite")]
            Inner::Sqlite(c) => c.close(),
            #[cfg(feature = "mysql")]
            Inner::Mysql(c) => c.close(),
        }
    }
}

/// Lazy iterator over the keys of a [`Collection`], in insertion (row id) order.
///
/// Yields `Result<String>` because each page fetch can fail. Created by
/// [`Collection::keys`].
pub struct Keys<'a> {
    inner: KeysInner<'a>,
}

enum KeysInner<'a> {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteKeys<'a>),
    #[cfg(feature = "mysql")]
    Mysql(MysqlKeys<'a>),
}

impl Iterator for Keys<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            #[cfg(feature = "sqlite")]
            KeysInner::Sqlite(it) => it.next(),
            #[cfg(feature = "mysql")]
            KeysInner::Mysql(it) => it.next(),
        }
    }
}

/// Lazy iterator over the `(key, value)` pairs of a [`Collection`], in insertion
/// (row id) order.
///
/// Created by [`Collection::items`]. Iteration ends after the first decode
/// failure.
pub struct Items<'a> {
    inner: ItemsInner<'a>,
}

enum ItemsInner<'a> {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteItems<'a>),
    #[cfg(feature = "mysql")]
    Mysql(MysqlItems<'a>),
}

impl Iterator for Items<'_> {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            #[cfg(feature = "sqlite")]
            ItemsInner::Sqlite(it) => it.next(),
            #[cfg(feature = "mysql")]
            ItemsInner::Mysql(it) => it.next(),
        }
    }
}

// the length check runs before any I/O so an oversize key never reaches a backend
fn check_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        Err(KvError::KeyTooLong { len: key.len() })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_keys_up_to_the_limit() {
        assert!(check_key("").is_ok());
        assert!(check_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn rejects_keys_over_the_limit() {
        let err = check_key(&"k".repeat(MAX_KEY_LEN + 1)).unwrap_err();
        match err {
            KvError::KeyTooLong { len } => assert_eq!(len, 41),
            other => panic!("expected KeyTooLong, got {:?}", other),
        }
    }

    #[test]
    fn key_limit_counts_bytes_not_chars() {
        // fourteen cyrillic chars, twenty eight bytes: fine
        assert!(check_key(&"ф".repeat(14)).is_ok());
        // twenty one cyrillic chars, forty two bytes: over the limit
        let err = check_key(&"ф".repeat(21)).unwrap_err();
        assert!(matches!(err, KvError::KeyTooLong { len: 42 }));
    }
}
