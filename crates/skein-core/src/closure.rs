//! Serializable references to registered process bodies.
//!
//! A [`Closure`] carries no code: it names a body registered under an
//! agreed string on every node, plus the encoded arguments to hand that
//! body. Materializing one requires the receiving node to have registered
//! the same name with a matching argument decoder.

use crate::{EncodeError, Envelope, Wire};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A serializable reference to a named top-level body and its arguments.
///
/// Closures cannot capture state from the caller; only the registered
/// name and the encoded argument bytes cross the wire.
///
/// # Examples
///
/// ```
/// use skein_core::Closure;
///
/// let c = Closure::new("worker.crunch", &(10u32, 20u32)).unwrap();
/// assert_eq!(c.name(), "worker.crunch");
///
/// let idle = Closure::nullary("worker.idle");
/// assert!(idle.args().payload.is_empty());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    name: String,
    /// Encoded argument bytes; the tag lets the target cross-check the
    /// registered decoder before materializing.
    args: Envelope,
}

impl Closure {
    /// Creates a closure reference with encoded arguments.
    pub fn new<A: Wire>(name: impl Into<String>, args: &A) -> Result<Self, EncodeError> {
        Ok(Self {
            name: name.into(),
            args: Envelope::seal(args)?,
        })
    }

    /// Creates a closure reference taking no arguments.
    pub fn nullary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Envelope {
                tag: <() as Wire>::type_tag().to_string(),
                payload: Vec::new(),
            },
        }
    }

    /// Returns the registered name this closure refers to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the sealed argument envelope.
    pub fn args(&self) -> &Envelope {
        &self.args
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}b", self.name, self.args.payload.len())
    }
}

// Debug omits the payload bytes; argument blobs can be large.
impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("args_tag", &self.args.tag)
            .field("args_len", &self.args.payload.len())
            .finish()
    }
}
