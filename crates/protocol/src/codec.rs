//! Structured payload codecs.
//!
//! A [`PayloadCodec`] turns a serde value into plaintext bytes before padding
//! and back after unpadding. JSON is the default; MessagePack is available for
//! peers that prefer a compact binary encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Bijective encoding between payload values and bytes.
pub trait PayloadCodec: Send + Sync {
    /// Encode a value to bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes produced by [`encode`](Self::encode).
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// UTF-8 JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// MessagePack payloads with named struct fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl PayloadCodec for MsgpackCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
