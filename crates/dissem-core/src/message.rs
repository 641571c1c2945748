//! Messages exchanged between nodes.
//!
//! A message announces one key. A summary carries only the version and a
//! payload digest (control traffic); a data message carries the full payload
//! (data traffic).

use crate::key::Key;
use crate::version::{Digest, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of the software image a node runs.
///
/// Nodes built from unrelated images may have picked the same keys for
/// different variables; a receiver that knows its own GUID ignores messages
/// stamped with a different one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageGuid(Uuid);

impl ImageGuid {
    /// Wrap a UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Build from the 16 raw bytes carried on the wire.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw bytes for the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ImageGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a message carries besides key and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Body {
    /// Control traffic: digest of the sender's payload
    Summary {
        /// Digest of the announced payload
        digest: Digest,
    },
    /// Data traffic: the full payload
    Data {
        /// The payload bytes
        payload: Vec<u8>,
    },
}

/// One announcement of a key's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Announced key
    pub key: Key,
    /// Sender's version for the key
    pub version: Version,
    /// Summary or data
    pub body: Body,
    /// Sender's image GUID, if it stamps one
    pub origin: Option<ImageGuid>,
}

impl Message {
    /// Create a summary message for `payload` at `version`.
    #[must_use]
    pub fn summary(key: Key, version: Version, payload: &[u8]) -> Self {
        Self {
            key,
            version,
            body: Body::Summary {
                digest: Digest::of(payload),
            },
            origin: None,
        }
    }

    /// Create a data message carrying a copy of `payload`.
    #[must_use]
    pub fn data(key: Key, version: Version, payload: &[u8]) -> Self {
        Self {
            key,
            version,
            body: Body::Data {
                payload: payload.to_vec(),
            },
            origin: None,
        }
    }

    /// Stamp the message with an image GUID.
    #[must_use]
    pub fn with_origin(mut self, origin: Option<ImageGuid>) -> Self {
        self.origin = origin;
        self
    }

    /// Payload of a data message.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Data { payload } => Some(payload),
            Body::Summary { .. } => None,
        }
    }

    /// Whether this is a data message.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self.body, Body::Data { .. })
    }
}
