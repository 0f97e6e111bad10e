//! Serialization between strongly typed values and wire payloads
//!
//! Transports only ever move opaque bytes. A [`Codec`] sits in front of them and translates between
//! these bytes and the types callers actually work with. [`JsonCodec`] provides an implementation
//! using [`serde_json`]; exchanging the serialization format only requires a different codec.

use crate::library::BoxedError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encoder and decoder for message payloads
pub trait Codec {
    /// Serializes a value into a payload ready to be sent over a transport
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, BoxedError>;

    /// Deserializes a raw payload received from a transport
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, BoxedError>;
}

/// [`Codec`] implementation based on [`serde_json`]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    /// Serializes the value using [`serde_json::to_vec`]
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, BoxedError> {
        serde_json::to_vec(value).map_err(Into::into)
    }

    /// Parses the payload using [`serde_json::from_slice`]
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, BoxedError> {
        serde_json::from_slice(payload).map_err(Into::into)
    }
}
