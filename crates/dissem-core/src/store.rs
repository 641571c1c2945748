//! Per-key value storage and the rules for accepting updates.
//!
//! A [`Variable`] moves through three states:
//!
//! | State | Version | `set` | `change` / inbound |
//! |-------|---------|-------|--------------------|
//! | pre-active | 0 (or whatever `set` left) | allowed | activates |
//! | active | non-zero | rejected | allowed |
//!
//! Local writes bump the version; inbound data replaces the value only when
//! it is strictly newer by [`compare_values`].

use crate::key::Key;
use crate::message::Body;
use crate::version::{compare_values, Digest, Version};
use std::cmp::Ordering;

/// A read-only view of a variable.
///
/// The view borrows the owning store, so the value cannot change while the
/// view is alive. Copy the bytes out to keep them across a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueView<'a> {
    key: Key,
    version: Version,
    payload: &'a [u8],
}

impl<'a> ValueView<'a> {
    /// Key of the variable.
    #[must_use]
    pub fn key(&self) -> Key {
        self.key
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Current payload.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.payload
    }
}

/// Outcome of comparing an inbound message with the local value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// Remote value was newer and replaced the local one
    Adopted,
    /// Remote announced exactly the local state
    Consistent,
    /// Remote announced something other than the local state and did not
    /// carry a newer value; the local value should be sent
    Mismatch,
    /// Message cannot describe this variable (wrong payload size, data
    /// without a version)
    Malformed,
}

/// The locally stored state of one disseminated variable.
#[derive(Debug, Clone)]
pub struct Variable {
    key: Key,
    version: Version,
    payload: Box<[u8]>,
    digest: Digest,
    activated: bool,
}

impl Variable {
    /// Create a pre-active variable with a zeroed payload of `size` bytes.
    #[must_use]
    pub fn new(key: Key, size: usize) -> Self {
        let payload = vec![0_u8; size].into_boxed_slice();
        let digest = Digest::of(&payload);
        Self {
            key,
            version: Version::UNKNOWN,
            payload,
            digest,
            activated: false,
        }
    }

    /// Key of the variable.
    #[must_use]
    pub fn key(&self) -> Key {
        self.key
    }

    /// Registered payload size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether the variable has been written by `change` or by the network.
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Digest of the current payload.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Borrow the current value.
    #[must_use]
    pub fn view(&self) -> ValueView<'_> {
        ValueView {
            key: self.key,
            version: self.version,
            payload: &self.payload,
        }
    }

    /// Overwrite the value before activation, leaving the version alone.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyActivated`] once the variable is active
    /// and [`StoreError::SizeMismatch`] for a value of the wrong size. The
    /// value is untouched on error.
    pub fn set(&mut self, value: &[u8]) -> Result<(), StoreError> {
        if self.activated {
            return Err(StoreError::AlreadyActivated(self.key));
        }
        self.check_size(value)?;
        self.overwrite(value);
        Ok(())
    }

    /// Write a new local value and bump the version.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SizeMismatch`] for a value of the wrong size.
    pub fn change(&mut self, value: &[u8]) -> Result<Version, StoreError> {
        self.check_size(value)?;
        self.overwrite(value);
        self.version = self.version.next();
        self.activated = true;
        Ok(self.version)
    }

    /// Compare an inbound announcement with the local value, adopting it if
    /// it is newer.
    pub fn receive(&mut self, version: Version, body: &Body) -> Reception {
        match body {
            Body::Summary { digest } => {
                if version == self.version
                    && (version.is_unknown() || *digest == self.digest)
                {
                    Reception::Consistent
                } else {
                    Reception::Mismatch
                }
            }
            Body::Data { payload } => {
                if payload.len() != self.payload.len() || version.is_unknown() {
                    return Reception::Malformed;
                }
                match compare_values((version, payload), (self.version, &self.payload)) {
                    Ordering::Greater => {
                        self.overwrite(payload);
                        self.version = version;
                        self.activated = true;
                        Reception::Adopted
                    }
                    Ordering::Equal => Reception::Consistent,
                    Ordering::Less => Reception::Mismatch,
                }
            }
        }
    }

    fn check_size(&self, value: &[u8]) -> Result<(), StoreError> {
        if value.len() == self.payload.len() {
            Ok(())
        } else {
            Err(StoreError::SizeMismatch {
                key: self.key,
                expected: self.payload.len(),
                actual: value.len(),
            })
        }
    }

    fn overwrite(&mut self, value: &[u8]) {
        self.payload.copy_from_slice(value);
        self.digest = Digest::of(value);
    }
}

/// Usage errors reported to local callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Key was never registered
    #[error("unknown key {0}")]
    UnknownKey(Key),
    /// Value size differs from the registered size
    #[error("key {key}: value is {actual} bytes, registered size is {expected}")]
    SizeMismatch {
        /// Key being written
        key: Key,
        /// Registered size
        expected: usize,
        /// Size of the rejected value
        actual: usize,
    },
    /// `set` called after the variable was activated
    #[error("key {0} is already active; use change instead of set")]
    AlreadyActivated(Key),
}
