//! Key registry.
//!
//! Owns exactly one [`Variable`], one [`TrickleTimer`] and one observer list
//! per registered key. Registration happens once at startup; every check that
//! could reveal a build or configuration mistake happens here rather than
//! per message.

use crate::key::{Key, GENERATED_BIT};
use crate::notify::Subscribers;
use crate::store::Variable;
use crate::trickle::{ParamError, TrickleParams, TrickleTimer};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Instant;

/// Everything the node keeps for one key.
#[derive(Debug)]
pub struct Slot {
    /// Stored value
    pub variable: Variable,
    /// Trickle state
    pub timer: TrickleTimer,
    /// Change subscribers
    pub subscribers: Subscribers,
}

/// Registry of all keys a node disseminates.
#[derive(Debug)]
pub struct KeyRegistry {
    max_payload: usize,
    slots: BTreeMap<Key, Slot>,
    next_generated: u16,
}

impl KeyRegistry {
    /// Create an empty registry accepting values up to `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            slots: BTreeMap::new(),
            next_generated: 0,
        }
    }

    /// Largest value size accepted at registration.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Register `key` with a payload of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateKey`] if the key already exists,
    /// [`RegistryError::PayloadTooLarge`] if `size` does not fit one message
    /// and [`RegistryError::InvalidParameters`] for a zero size or unusable
    /// timer bounds.
    pub fn register<R: Rng + ?Sized>(
        &mut self,
        key: Key,
        size: usize,
        params: TrickleParams,
        now: Instant,
        rng: &mut R,
    ) -> Result<Key, RegistryError> {
        if self.slots.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        if size > self.max_payload {
            return Err(RegistryError::PayloadTooLarge {
                key,
                size,
                max: self.max_payload,
            });
        }
        if size == 0 {
            return Err(RegistryError::InvalidParameters {
                key,
                source: ParamError::ZeroSize,
            });
        }
        params
            .validate()
            .map_err(|source| RegistryError::InvalidParameters { key, source })?;

        tracing::debug!(%key, size, imin = ?params.imin, imax = ?params.imax, "Registered key");

        self.slots.insert(
            key,
            Slot {
                variable: Variable::new(key, size),
                timer: TrickleTimer::new(params, now, rng),
                subscribers: Subscribers::new(),
            },
        );
        Ok(key)
    }

    /// Register the next free key from the generated half of the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::KeySpaceExhausted`] when no generated key is
    /// left, plus the errors of [`register`](Self::register).
    pub fn register_generated<R: Rng + ?Sized>(
        &mut self,
        size: usize,
        params: TrickleParams,
        now: Instant,
        rng: &mut R,
    ) -> Result<Key, RegistryError> {
        let mut index = self.next_generated;
        let key = loop {
            if index >= GENERATED_BIT {
                return Err(RegistryError::KeySpaceExhausted);
            }
            let candidate = Key::from_raw(index | GENERATED_BIT);
            if !self.slots.contains_key(&candidate) {
                break candidate;
            }
            index += 1;
        };
        self.register(key, size, params, now, rng)?;
        self.next_generated = index + 1;
        Ok(key)
    }

    /// Whether `key` is registered.
    #[must_use]
    pub fn contains(&self, key: Key) -> bool {
        self.slots.contains_key(&key)
    }

    /// State for `key`.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<&Slot> {
        self.slots.get(&key)
    }

    /// Mutable state for `key`.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut Slot> {
        self.slots.get_mut(&key)
    }

    /// Registered keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.slots.keys().copied()
    }

    /// All slots in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &Slot)> {
        self.slots.iter().map(|(key, slot)| (*key, slot))
    }

    /// All slots in ascending key order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Key, &mut Slot)> {
        self.slots.iter_mut().map(|(key, slot)| (*key, slot))
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no key is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Configuration errors raised at registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two producers configured with the same key
    #[error("key {0} is already registered")]
    DuplicateKey(Key),
    /// Registered size exceeds one transport payload
    #[error("key {key}: size {size} exceeds the {max}-byte message payload")]
    PayloadTooLarge {
        /// Offending key
        key: Key,
        /// Requested size
        size: usize,
        /// Largest size a message can carry
        max: usize,
    },
    /// Zero size or unusable timer parameters
    #[error("key {key}: {source}")]
    InvalidParameters {
        /// Offending key
        key: Key,
        /// What is wrong
        source: ParamError,
    },
    /// Every generated key is in use
    #[error("generated key space exhausted")]
    KeySpaceExhausted,
}
