//! The encodable capability and the envelope it produces.
//!
//! [`Wire`] is the capability of a value to be serialized to a
//! `(type tag, bytes)` pair and reconstructed from one. It is blanket
//! implemented for any `Serialize + DeserializeOwned + Send + 'static`
//! type using `postcard` for the byte encoding and the Rust type path as
//! the tag. Every node in a cluster runs the same binary, so tags agree
//! across the wire.
//!
//! An [`Envelope`] is a sealed value: the unit stored in mailboxes,
//! delivered to channels, and framed by the transport. The runtime never
//! looks inside the payload; only the tag drives matching.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Error produced when sealing a value into bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Serialization failed.
    #[error("failed to encode value: {0}")]
    Serialize(#[source] postcard::Error),
}

/// Error produced when reconstructing a value from bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Deserialization failed.
    #[error("failed to decode value: {0}")]
    Deserialize(#[from] postcard::Error),
    /// The envelope carries a different type than the one requested.
    #[error("type tag mismatch: expected `{expected}`, found `{found}`")]
    TagMismatch {
        /// Tag of the requested type.
        expected: &'static str,
        /// Tag carried by the envelope.
        found: String,
    },
}

/// The encodable capability.
///
/// # Examples
///
/// ```
/// use skein_core::Wire;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Ping { seq: u32 }
///
/// let bytes = Ping { seq: 7 }.encode().unwrap();
/// assert_eq!(Ping::decode(&bytes).unwrap(), Ping { seq: 7 });
/// ```
pub trait Wire: Sized + Send + 'static {
    /// The tag identifying this type on the wire and in mailboxes.
    fn type_tag() -> &'static str;

    /// Encodes this value into bytes.
    fn encode(&self) -> Result<Vec<u8>, EncodeError>;

    /// Decodes a value of this type from bytes.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

impl<T> Wire for T
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn type_tag() -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        postcard::to_allocvec(self).map_err(EncodeError::Serialize)
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        postcard::from_bytes(bytes).map_err(DecodeError::from)
    }
}

/// A sealed value: type tag plus encoded payload.
///
/// Envelopes are what mailboxes queue and what the transport frames. The
/// payload is opaque; selective receive discriminates on [`Envelope::tag`]
/// alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The type tag chosen by the sender's encodable capability.
    pub tag: String,
    /// The encoded payload.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Seals a value into an envelope.
    pub fn seal<T: Wire>(value: &T) -> Result<Self, EncodeError> {
        Ok(Self {
            tag: T::type_tag().to_string(),
            payload: value.encode()?,
        })
    }

    /// Returns `true` if this envelope carries a `T`.
    pub fn is<T: Wire>(&self) -> bool {
        self.tag == T::type_tag()
    }

    /// Opens the envelope as a `T`.
    ///
    /// Fails with [`DecodeError::TagMismatch`] if the envelope carries a
    /// different type, without attempting to deserialize the payload.
    pub fn open<T: Wire>(&self) -> Result<T, DecodeError> {
        if !self.is::<T>() {
            return Err(DecodeError::TagMismatch {
                expected: T::type_tag(),
                found: self.tag.clone(),
            });
        }
        T::decode(&self.payload)
    }
}
