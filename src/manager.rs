//! The backend-agnostic collection manager and the top-level open/remove entry
//! points.
//!
//! A manager parses the uri once, connects once, and from then on every call
//! dispatches straight to the backend it picked at construction. Most callers
//! never touch the manager at all and go through [`open`] and [`remove`].

use std::fmt;

use tracing::{debug, instrument};

#[cfg(feature = "mysql")]
use crate::backend::mysql::MysqlConnector;
#[cfg(feature = "sqlite")]
use crate::backend::sqlite::SqliteConnector;
use crate::collection::Collection;
use crate::error::{KvError, Result};
use crate::serializer::{BinarySerializer, Serializer};
use crate::uri::Descriptor;

/// Backend-agnostic facade over one database connection.
///
/// Construction parses the uri, picks the backend, and connects; collection
/// lifecycle operations ([`create`], [`remove`], [`collections`]) and the
/// collection factory ([`open_collection`]) all run against that connection.
///
/// [`create`]: CollectionManager::create
/// [`remove`]: CollectionManager::remove
/// [`collections`]: CollectionManager::collections
/// [`open_collection`]: CollectionManager::open_collection
pub struct CollectionManager {
    descriptor: Descriptor,
    backend: Connector,
}

enum Connector {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteConnector),
    #[cfg(feature = "mysql")]
    Mysql(MysqlConnector),
}

impl fmt::Debug for CollectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionManager")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl CollectionManager {
    /// parses `uri`, connects to the backend it names, and returns the manager
    ///
    /// # Errors
    /// returns [`KvError::MalformedUri`] if the uri cannot be parsed,
    /// [`KvError::UnsupportedBackend`] if it names a backend outside the supported
    /// set or one whose driver feature was not compiled in, and
    /// [`KvError::Connection`] if the driver fails to connect or authenticate
    pub fn new(uri: &str) -> Result<CollectionManager> {
        let descriptor = Descriptor::parse(uri)?;
        debug!("connecting to a {} backend", descriptor.backend());
        let backend = Connector::connect(&descriptor)?;
        Ok(CollectionManager {
            descriptor,
            backend,
        })
    }

    /// the parsed form of the uri this manager was built from
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// lists the collection (table) names currently present in the database
    pub fn collections(&self) -> Result<Vec<String>> {
        match &self.backend {
            #[cfg(feature = "sqlite")]
            Connector::Sqlite(c) => c.collections(),
            #[cfg(feature = "mysql")]
            Connector::Mysql(c) => c.collections(),
        }
    }

    /// creates the collection `name` if it does not exist yet; the creation is
    /// committed immediately
    pub fn create(&self, name: &str) -> Result<()> {
        match &self.backend {
            #[cfg(feature = "sqlite")]
            Connector::Sqlite(c) => c.create(name),
            #[cfg(feature = "mysql")]
            Connector::Mysql(c) => c.create(name),
        }
    }

    /// drops the collection `name`; the removal is committed immediately
    ///
    /// # Errors
    /// returns [`KvError::NoSuchCollection`] if `name` is absent from
    /// [`collections`](CollectionManager::collections)
    pub fn remove(&self, name: &str) -> Result<()> {
        match &self.backend {
            #[cfg(feature = "sqlite")]
            Connector::Sqlite(c) => c.remove(name),
            #[cfg(feature = "mysql")]
            Connector::Mysql(c) => c.remove(name),
        }
    }

    /// opens the collection `name` bound to `serializer`, creating it first if it
    /// does not exist
    ///
    /// The handle shares this manager's connection, so writes made through it are
    /// visible to sibling handles before they are committed.
    pub fn open_collection(
        &self,
        name: &str,
        serializer: Box<dyn Serializer>,
    ) -> Result<Collection> {
        self.create(name)?;
        match &self.backend {
            #[cfg(feature = "sqlite")]
            Connector::Sqlite(c) => Ok(Collection::from_sqlite(
                c.open_collection(name, serializer)?,
            )),
            #[cfg(feature = "mysql")]
            Connector::Mysql(c) => Ok(Collection::from_mysql(
                c.open_collection(name, serializer)?,
            )),
        }
    }
}

impl Connector {
    fn connect(descriptor: &Descriptor) -> Result<Connector> {
        match descriptor {
            #[cfg(feature = "sqlite")]
            Descriptor::Sqlite { database, .. } => {
                Ok(Connector::Sqlite(SqliteConnector::connect(database)?))
            }
            #[cfg(feature = "mysql")]
            Descriptor::Mysql {
                username,
                password,
                host,
                port,
                database,
                ..
            } => Ok(Connector::Mysql(MysqlConnector::connect(
                username, password, host, *port, database,
            )?)),
            // reached when the uri names a backend whose driver feature is off
            #[allow(unreachable_patterns)]
            other => Err(KvError::UnsupportedBackend(other.backend().to_string())),
        }
    }
}

/// opens the collection named by `uri` with the default [`BinarySerializer`],
/// creating it if it does not exist
///
/// # Errors
/// fails like [`CollectionManager::new`], and with [`KvError::MalformedUri`] if
/// the uri does not name a collection
#[instrument]
pub fn open(uri: &str) -> Result<Collection> {
    open_with_serializer(uri, Box::new(BinarySerializer))
}

/// opens the collection named by `uri` bound to `serializer`, creating it if it
/// does not exist
///
/// Every value written through the returned handle uses `serializer`; reading a
/// collection with a different serializer than the one that wrote it fails with
/// [`KvError::Deserialization`].
pub fn open_with_serializer(uri: &str, serializer: Box<dyn Serializer>) -> Result<Collection> {
    let manager = CollectionManager::new(uri)?;
    let name = match manager.descriptor().collection() {
        Some(name) => name.to_string(),
        None => {
            return Err(KvError::MalformedUri {
                uri: uri.to_string(),
                reason: "no collection name".to_string(),
            })
        }
    };
    manager.open_collection(&name, serializer)
}

/// removes the collection named by `uri` if it exists; removing an absent
/// collection (or a uri without a collection name) is a no-op
#[instrument]
pub fn remove(uri: &str) -> Result<()> {
    let manager = CollectionManager::new(uri)?;
    if let Some(name) = manager.descriptor().collection() {
        if manager.collections()?.iter().any(|n| n == name) {
            return manager.remove(name);
        }
    }
    Ok(())
}
