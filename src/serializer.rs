//! Pluggable value codecs.
//!
//! A [`Serializer`] converts a [`Value`] to and from the opaque payload stored in a
//! collection's value column. The codec is chosen when a collection is opened and
//! every row written through that handle uses it. Nothing tags a stored row with
//! the codec that produced it, so reading a collection with a different serializer
//! than the one that wrote it fails at decode time, surfaced by the collection as
//! a deserialization error carrying the offending key.

use std::io::{Cursor, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// error produced by a [`Serializer`] when a value cannot be encoded, or a stored
/// payload cannot be decoded back into a value
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    fn new(msg: impl Into<String>) -> CodecError {
        CodecError(msg.into())
    }
}

/// A pluggable codec converting a [`Value`] to and from stored payload bytes.
///
/// Implementations are used through `Box<dyn Serializer>` so a collection can be
/// bound to any codec at open time. Use one serializer consistently per collection;
/// see the module docs for what happens when codecs are mixed.
pub trait Serializer: Send {
    /// encodes `value` into the payload bytes to store
    fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, CodecError>;

    /// decodes a stored payload back into a [`Value`]
    fn decode(&self, payload: &[u8]) -> std::result::Result<Value, CodecError>;
}

/// The default codec: compact, self-describing binary encoding (MessagePack),
/// no compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec(value).map_err(|e| CodecError::new(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> std::result::Result<Value, CodecError> {
        let mut cursor = Cursor::new(payload);
        let value = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            Value::deserialize(&mut de).map_err(|e| CodecError::new(e.to_string()))?
        };
        // a document written by this codec spans the whole payload; leftover bytes
        // mean the row was written by a different codec
        if (cursor.position() as usize) != payload.len() {
            return Err(CodecError::new("payload has trailing bytes after the document"));
        }
        Ok(value)
    }
}

/// Codec storing values as zlib-compressed JSON text.
///
/// Trades encode/decode time for smaller rows; useful when values are large,
/// repetitive documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompressedJsonSerializer;

impl Serializer for CompressedJsonSerializer {
    fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(value).map_err(|e| CodecError::new(e.to_string()))?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| CodecError::new(e.to_string()))?;
        encoder.finish().map_err(|e| CodecError::new(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> std::result::Result<Value, CodecError> {
        let mut json = Vec::new();
        ZlibDecoder::new(payload)
            .read_to_end(&mut json)
            .map_err(|e| CodecError::new(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| CodecError::new(e.to_string()))
    }
}

/// Codec storing values as plain JSON text.
///
/// The least compact option, but rows are readable straight out of the database
/// with any SQL client.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::new(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> std::result::Result<Value, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_values() -> Vec<Value> {
        vec![
            json!(null),
            json!(true),
            json!(42),
            json!(-7.25),
            json!("hello"),
            json!("ключ и значение"),
            json!([1, "two", [3.0], {"four": 4}]),
            json!({
                "name": "kvlite",
                "tags": ["kv", "sql"],
                "nested": {"depth": 2, "unicode": "日本語"},
            }),
        ]
    }

    #[test]
    fn binary_round_trips_representative_values() {
        for value in sample_values() {
            let payload = BinarySerializer.encode(&value).expect("encode");
            let decoded = BinarySerializer.decode(&payload).expect("decode");
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn compressed_json_round_trips_representative_values() {
        for value in sample_values() {
            let payload = CompressedJsonSerializer.encode(&value).expect("encode");
            let decoded = CompressedJsonSerializer.decode(&payload).expect("decode");
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn json_round_trips_representative_values() {
        for value in sample_values() {
            let payload = JsonSerializer.encode(&value).expect("encode");
            let decoded = JsonSerializer.decode(&payload).expect("decode");
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn binary_rejects_compressed_payloads() {
        let payload = CompressedJsonSerializer
            .encode(&json!({"a": [1, 2, 3]}))
            .expect("encode");
        assert!(BinarySerializer.decode(&payload).is_err());
    }

    #[test]
    fn compressed_rejects_binary_payloads() {
        let payload = BinarySerializer
            .encode(&json!({"a": [1, 2, 3]}))
            .expect("encode");
        assert!(CompressedJsonSerializer.decode(&payload).is_err());
    }

    #[test]
    fn binary_rejects_trailing_bytes() {
        let mut payload = BinarySerializer.encode(&json!(1)).expect("encode");
        payload.push(0x00);
        let err = BinarySerializer.decode(&payload).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }
}
