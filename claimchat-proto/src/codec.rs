//! Serialization and deserialization for the `ClaimChat` wire protocol.
//!
//! Events are encoded with postcard and carried one per binary WebSocket
//! frame, so no length prefix is needed.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes any wire type into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes any wire type from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ClientEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<Vec<u8>, CodecError> {
    encode(event)
}

/// Decodes a [`ClientEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a client event.
pub fn decode_client(bytes: &[u8]) -> Result<ClientEvent, CodecError> {
    decode(bytes)
}

/// Encodes a [`ServerEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<Vec<u8>, CodecError> {
    encode(event)
}

/// Decodes a [`ServerEvent`].
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a server event.
pub fn decode_server(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    decode(bytes)
}
