//! Backend connectors and their collection engines.
//!
//! One submodule per SQL engine. Each provides a connector owning the live driver
//! connection (with the collection lifecycle operations `create`, `remove`, and the
//! catalog listing) and a collection type implementing the key-value contract on top
//! of it. Which submodules are compiled in is controlled by the `sqlite` and `mysql`
//! cargo features.

use serde_json::Value;

use crate::error::{KvError, Result};
use crate::serializer::Serializer;

#[cfg(feature = "mysql")]
pub(crate) mod mysql;
#[cfg(feature = "sqlite")]
pub(crate) mod sqlite;

// rows fetched per round trip while iterating keys()/items()
pub(crate) const PAGE_SIZE: u32 = 1000;

// identifiers generated per refill of a collection's uuid cache
pub(crate) const UUID_BATCH: usize = 100;

// fixed width of the identifiers handed out by get_uuid()
pub(crate) const UUID_LEN: usize = 40;

/// checks that `name` is usable as a table name.
///
/// Table names cannot be bound as statement parameters, so anything outside
/// `[A-Za-z_][A-Za-z0-9_]*` is rejected before any SQL text is built from it.
pub(crate) fn validate_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(KvError::InvalidCollectionName(name.to_string()))
    }
}

/// left-pads `id` with zeros to the fixed uuid width
pub(crate) fn pad_uuid(id: &str) -> String {
    format!("{:0>width$}", id, width = UUID_LEN)
}

/// runs a stored payload through the collection's serializer, annotating a codec
/// failure with the key it belongs to
pub(crate) fn decode(serializer: &dyn Serializer, key: &str, payload: &[u8]) -> Result<Value> {
    serializer
        .decode(payload)
        .map_err(|e| KvError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
}
