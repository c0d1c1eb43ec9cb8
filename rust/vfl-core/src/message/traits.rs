//! Message traits.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to encode payload: {0}")]
/// An error related to the serialization of a payload.
pub struct EncodeError(#[from] serde_json::Error);

#[derive(Debug, Error)]
#[error("failed to decode payload: {0}")]
/// An error related to the deserialization of a payload.
pub struct DecodeError(#[from] serde_json::Error);

/// A marker for types that travel between the parties as JSON.
pub trait Payload: Serialize + DeserializeOwned {}

/// An interface for serializable message types.
///
/// See also [`FromBytes`] for deserialization.
pub trait ToBytes {
    /// Serializes the type into its wire form.
    ///
    /// # Errors
    /// Fails if the type holds values without a JSON representation.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError>;
}

/// An interface for deserializable message types.
///
/// See also [`ToBytes`] for serialization.
pub trait FromBytes: Sized {
    /// Deserializes the type from its wire form.
    ///
    /// # Errors
    /// Fails if the buffer is not a valid encoding of the type.
    fn from_bytes<T: AsRef<[u8]> + ?Sized>(buffer: &T) -> Result<Self, DecodeError>;
}

impl<P: Payload> ToBytes for P {
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(self).map_err(EncodeError)
    }
}

impl<P: Payload> FromBytes for P {
    fn from_bytes<T: AsRef<[u8]> + ?Sized>(buffer: &T) -> Result<Self, DecodeError> {
        serde_json::from_slice(buffer.as_ref()).map_err(DecodeError)
    }
}
