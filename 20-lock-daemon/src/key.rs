//! Resource keys: the names clients lock.
//!
//! A key is conventionally a file path, but the daemon never touches the
//! filesystem; it is an opaque byte string that must fit the 255-byte key
//! field of a request frame. Like file names on Unix, keys need not be valid
//! UTF-8.

use std::{borrow::Borrow, borrow::Cow, fmt, str::FromStr};

use thiserror::Error;

/// Largest key, in bytes, that fits in a request frame.
pub const MAX_KEY_LEN: usize = 255;

/// Name of a lockable resource.
///
/// Always non-empty, at most [`MAX_KEY_LEN`] bytes, with no NUL bytes (NUL is
/// the padding byte on the wire).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Box<[u8]>);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("resource key is empty")]
    Empty,
    #[error("resource key is {0} bytes long; at most {MAX_KEY_LEN} are allowed")]
    TooLong(usize),
    #[error("resource key contains a NUL byte")]
    ContainsNul,
}

impl ResourceKey {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, KeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong(key.len()));
        }
        if key.contains(&0) {
            return Err(KeyError::ContainsNul);
        }
        Ok(Self(key.into_boxed_slice()))
    }

    /// Builds a key from raw bytes taken off the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The key as text, with invalid UTF-8 replaced by U+FFFD.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceKey")
            .field(&self.to_string_lossy())
            .finish()
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ResourceKey {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&[u8]> for ResourceKey {
    type Error = KeyError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<[u8]> for ResourceKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for ResourceKey {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}
