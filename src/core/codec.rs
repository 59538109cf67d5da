//! Byte-string codec boundary.
//!
//! State machines only ever see opaque byte strings and typed operation
//! values. Turning wire bytes into operations, and events back into bytes,
//! happens here, outside the resource lane.

use crate::core::error::AtollResult;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A pluggable serialization format.
pub trait Codec {
    /// Short format name, used in logs and CLI output.
    fn name(&self) -> &'static str;

    /// Encode a value.
    fn encode<T: Serialize>(&self, value: &T) -> AtollResult<Bytes>;

    /// Decode a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> AtollResult<T>;
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> AtollResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> AtollResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary codec, also used for snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode<T: Serialize>(&self, value: &T) -> AtollResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(value)?))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> AtollResult<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Codec selection, as configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    Bincode,
}

impl Codec for CodecKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Json => JsonCodec.name(),
            Self::Bincode => BincodeCodec.name(),
        }
    }

    fn encode<T: Serialize>(&self, value: &T) -> AtollResult<Bytes> {
        match self {
            Self::Json => JsonCodec.encode(value),
            Self::Bincode => BincodeCodec.encode(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> AtollResult<T> {
        match self {
            Self::Json => JsonCodec.decode(bytes),
            Self::Bincode => BincodeCodec.decode(bytes),
        }
    }
}
