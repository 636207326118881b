use thiserror::Error;

/// type alias for all operations on a [`Collection`] or [`CollectionManager`] that could
/// fail with a [`KvError`]
///
/// [`Collection`]: crate::Collection
/// [`CollectionManager`]: crate::CollectionManager
pub type Result<T> = std::result::Result<T, KvError>;

/// The error variants surfaced by this crate.
///
/// Lower level errors coming from the SQL drivers are wrapped, never swallowed, so the
/// original cause stays attached. Nothing in this crate retries or reconnects on its own;
/// every failure propagates to the caller.
#[derive(Debug, Error)]
pub enum KvError {
    /// the connection uri could not be split into its required components
    #[error("malformed connection uri '{uri}': {reason}")]
    MalformedUri {
        /// the uri exactly as the caller supplied it
        uri: String,
        /// which component split failed
        reason: String,
    },

    /// the uri names a backend outside the supported set, or one whose driver
    /// was not compiled in
    #[error("unsupported backend '{0}'")]
    UnsupportedBackend(String),

    /// the underlying driver failed to connect or authenticate
    #[error("could not connect to the backend: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// a collection was removed (or operated on) that is absent from the database
    #[error("no such collection '{0}'")]
    NoSuchCollection(String),

    /// the collection name cannot be used as a table name
    ///
    /// table names are spliced into SQL text, so only `[A-Za-z_][A-Za-z0-9_]*` is accepted
    #[error("invalid collection name '{0}'")]
    InvalidCollectionName(String),

    /// a key longer than the fixed limit was rejected before any statement ran
    #[error("key length {len} exceeds the {} byte limit", crate::collection::MAX_KEY_LEN)]
    KeyTooLong {
        /// byte length of the offending key
        len: usize,
    },

    /// a value could not be encoded by the serializer bound to the collection
    #[error("could not serialize value for key '{key}': {reason}")]
    Serialization {
        /// the key the value was being stored under
        key: String,
        /// what the codec reported
        reason: String,
    },

    /// a stored payload could not be decoded by the serializer bound to the collection,
    /// usually because the row was written with a different serializer
    #[error("could not deserialize value for key '{key}': {reason}")]
    Deserialization {
        /// the key whose payload failed to decode
        key: String,
        /// what the codec reported
        reason: String,
    },

    /// an operation was attempted on a collection handle after `close()`
    #[error("operation on a closed collection handle")]
    ClosedHandle,

    /// wrapped error from the sqlite driver
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// wrapped error from the mysql driver
    #[cfg(feature = "mysql")]
    #[error("mysql error: {0}")]
    Mysql(#[from] mysql::Error),
}
