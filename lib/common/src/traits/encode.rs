//! # Encoding Subsystem
//!
//! The encoding subsystem converts values that cross the network boundary into a binary
//! payload and back. Framing (kind byte and length header) is handled by the protocol
//! layer; this module only deals with payload bytes.
//!
//! ## Key Components
//!
//! ### `Encodable` / `Decodable` Traits
//!
//! ```rust
//! use common::traits::encode::EncodingError;
//!
//! trait Encodable {
//!    fn encode(&self) -> Result<Vec<u8>, EncodingError>;
//! }
//!
//! trait Decodable: Sized {
//!    fn decode(bytes: &[u8]) -> Result<Self, EncodingError>;
//! }
//! ```
//!
//! Any type that travels inside a frame implements both. Types that are already
//! `serde`-serializable get both for free through the JSON helpers below.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub trait Encodable {
    fn encode(&self) -> Result<Vec<u8>, EncodingError>;
}

pub trait Decodable: Sized {
    fn decode(bytes: &[u8]) -> Result<Self, EncodingError>;
}

/// Encode a serializable value as a JSON payload.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodingError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a JSON payload produced by [`encode_json`].
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EncodingError> {
    Ok(serde_json::from_slice(bytes)?)
}
