//! A dissemination node.
//!
//! [`Node`] owns the key registry and is the only way to reach per-key
//! state. Every entry point takes `&mut self`, so local writes, inbound
//! messages and timer polls for a key are serialized by construction.
//!
//! The node performs no I/O: callers hand it inbound [`Message`]s and the
//! current time, and send whatever [`Node::poll`] returns.

use crate::key::Key;
use crate::message::{ImageGuid, Message};
use crate::notify::{ChangeEvent, ChangeOrigin, SubscriptionId};
use crate::registry::{KeyRegistry, RegistryError, Slot};
use crate::store::{Reception, StoreError, ValueView};
use crate::trickle::{TrickleParams, Transmission};
use crate::value::{encode_to_vec, Handle, Payload};
use crate::version::Version;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

/// Node-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    /// Largest value a single message can carry
    pub max_payload: usize,
    /// Image GUID stamped on outgoing messages and checked on inbound ones
    pub image_guid: Option<ImageGuid>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_payload: 64,
            image_guid: None,
        }
    }
}

/// What the node did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A newer value was adopted
    Adopted,
    /// The sender agrees with the local value
    Consistent,
    /// The sender disagrees and holds nothing newer; the local value will be
    /// announced at `Imin` pace
    Inconsistent,
    /// The message was dropped
    Ignored(IgnoreReason),
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Key is not registered on this node
    UnknownKey,
    /// Sender runs a different image
    ForeignImage,
    /// Payload size or version cannot belong to the key
    Malformed,
}

/// A node holding local replicas of registered keys.
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    registry: KeyRegistry,
    rng: StdRng,
}

impl Node {
    /// Create a node with an entropy-seeded timer RNG.
    #[must_use]
    pub fn new(config: NodeConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a node with a deterministic timer RNG.
    #[must_use]
    pub fn with_seed(config: NodeConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: NodeConfig, rng: StdRng) -> Self {
        Self {
            registry: KeyRegistry::new(config.max_payload),
            config,
            rng,
        }
    }

    /// Node settings.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Read-only access to the registry.
    #[must_use]
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Register `key` holding `size`-byte values.
    ///
    /// # Errors
    ///
    /// Returns the configuration errors of [`KeyRegistry::register`].
    pub fn register(
        &mut self,
        key: Key,
        size: usize,
        params: TrickleParams,
        now: Instant,
    ) -> Result<Key, RegistryError> {
        self.registry.register(key, size, params, now, &mut self.rng)
    }

    /// Register the next free generated key.
    ///
    /// # Errors
    ///
    /// Returns the configuration errors of
    /// [`KeyRegistry::register_generated`].
    pub fn register_generated(
        &mut self,
        size: usize,
        params: TrickleParams,
        now: Instant,
    ) -> Result<Key, RegistryError> {
        self.registry
            .register_generated(size, params, now, &mut self.rng)
    }

    /// Register `key` holding values of type `T`.
    ///
    /// # Errors
    ///
    /// Returns the configuration errors of [`KeyRegistry::register`].
    pub fn register_typed<T: Payload>(
        &mut self,
        key: Key,
        params: TrickleParams,
        now: Instant,
    ) -> Result<Handle<T>, RegistryError> {
        self.register(key, T::SIZE, params, now).map(Handle::new)
    }

    /// Borrow the current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`] for an unregistered key.
    pub fn get(&self, key: Key) -> Result<ValueView<'_>, StoreError> {
        self.registry
            .get(key)
            .map(|slot| slot.variable.view())
            .ok_or(StoreError::UnknownKey(key))
    }

    /// Set the value of a key that has not been activated yet.
    ///
    /// No version change, no notification, no traffic.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`], [`StoreError::SizeMismatch`] or
    /// [`StoreError::AlreadyActivated`]; the value is unchanged on error.
    pub fn set(&mut self, key: Key, value: &[u8]) -> Result<(), StoreError> {
        self.slot_mut(key)?.variable.set(value)
    }

    /// Write a new local value.
    ///
    /// Bumps the version, notifies subscribers and starts announcing the
    /// value at `Imin` pace. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`] or [`StoreError::SizeMismatch`];
    /// the value is unchanged on error.
    pub fn change(&mut self, key: Key, value: &[u8], now: Instant) -> Result<Version, StoreError> {
        let slot = self
            .registry
            .get_mut(key)
            .ok_or(StoreError::UnknownKey(key))?;
        let version = slot.variable.change(value)?;

        tracing::debug!(%key, %version, "Local change");

        slot.timer.request_data();
        slot.timer.reset(now, &mut self.rng);
        notify(slot, ChangeOrigin::Local);
        Ok(version)
    }

    /// Decode the current value of a typed key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`] for an unregistered key and
    /// [`StoreError::SizeMismatch`] when the key was registered on this node
    /// with a size other than `T::SIZE`.
    pub fn get_as<T: Payload>(&self, handle: Handle<T>) -> Result<T, StoreError> {
        let view = self.get(handle.key())?;
        if view.bytes().len() != T::SIZE {
            return Err(StoreError::SizeMismatch {
                key: handle.key(),
                expected: view.bytes().len(),
                actual: T::SIZE,
            });
        }
        Ok(T::decode(view.bytes()))
    }

    /// Typed [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// As [`set`](Self::set).
    pub fn set_as<T: Payload>(&mut self, handle: Handle<T>, value: &T) -> Result<(), StoreError> {
        self.set(handle.key(), &encode_to_vec(value))
    }

    /// Typed [`change`](Self::change).
    ///
    /// # Errors
    ///
    /// As [`change`](Self::change).
    pub fn change_as<T: Payload>(
        &mut self,
        handle: Handle<T>,
        value: &T,
        now: Instant,
    ) -> Result<Version, StoreError> {
        self.change(handle.key(), &encode_to_vec(value), now)
    }

    /// Run `callback` after every change of `key`, local or remote.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`] for an unregistered key.
    pub fn subscribe<F>(&mut self, key: Key, callback: F) -> Result<SubscriptionId, StoreError>
    where
        F: FnMut(&ChangeEvent<'_>) + Send + 'static,
    {
        Ok(self.slot_mut(key)?.subscribers.subscribe(callback))
    }

    /// Remove a subscription. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`] for an unregistered key.
    pub fn unsubscribe(&mut self, key: Key, id: SubscriptionId) -> Result<bool, StoreError> {
        Ok(self.slot_mut(key)?.subscribers.unsubscribe(id))
    }

    /// Process one inbound message.
    ///
    /// Network faults are never errors: anything that cannot be used is
    /// reported as [`Disposition::Ignored`] and otherwise dropped.
    pub fn handle_message(&mut self, msg: &Message, now: Instant) -> Disposition {
        if let (Some(ours), Some(theirs)) = (self.config.image_guid, msg.origin) {
            if ours != theirs {
                tracing::debug!(key = %msg.key, origin = %theirs, "Ignoring message from foreign image");
                return Disposition::Ignored(IgnoreReason::ForeignImage);
            }
        }

        let Some(slot) = self.registry.get_mut(msg.key) else {
            tracing::debug!(key = %msg.key, "Ignoring message for unknown key");
            return Disposition::Ignored(IgnoreReason::UnknownKey);
        };

        match slot.variable.receive(msg.version, &msg.body) {
            Reception::Adopted => {
                tracing::debug!(key = %msg.key, version = %msg.version, "Adopted remote value");
                slot.timer.request_data();
                slot.timer.reset(now, &mut self.rng);
                notify(slot, ChangeOrigin::Remote);
                Disposition::Adopted
            }
            Reception::Consistent => {
                slot.timer.hear_consistent();
                Disposition::Consistent
            }
            Reception::Mismatch => {
                tracing::debug!(
                    key = %msg.key,
                    remote = %msg.version,
                    local = %slot.variable.version(),
                    "Neighbour out of date"
                );
                if !slot.variable.version().is_unknown() {
                    slot.timer.request_data();
                }
                slot.timer.reset(now, &mut self.rng);
                Disposition::Inconsistent
            }
            Reception::Malformed => {
                tracing::debug!(key = %msg.key, version = %msg.version, "Ignoring malformed message");
                Disposition::Ignored(IgnoreReason::Malformed)
            }
        }
    }

    /// Advance every timer to `now` and return the messages to broadcast.
    pub fn poll(&mut self, now: Instant) -> Vec<Message> {
        let origin = self.config.image_guid;
        let mut outgoing = Vec::new();

        for (key, slot) in self.registry.iter_mut() {
            let Some(kind) = slot.timer.poll(now, &mut self.rng) else {
                continue;
            };
            let view = slot.variable.view();
            let msg = if kind == Transmission::Data && !view.version().is_unknown() {
                Message::data(key, view.version(), view.bytes())
            } else {
                Message::summary(key, view.version(), view.bytes())
            };
            tracing::trace!(%key, version = %view.version(), data = msg.is_data(), "Announcing");
            outgoing.push(msg.with_origin(origin));
        }

        outgoing
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.registry
            .iter()
            .map(|(_, slot)| slot.timer.next_deadline())
            .min()
    }

    fn slot_mut(&mut self, key: Key) -> Result<&mut Slot, StoreError> {
        self.registry
            .get_mut(key)
            .ok_or(StoreError::UnknownKey(key))
    }
}

fn notify(slot: &mut Slot, origin: ChangeOrigin) {
    let view = slot.variable.view();
    slot.subscribers.notify(&ChangeEvent {
        key: view.key(),
        version: view.version(),
        payload: view.bytes(),
        origin,
    });
}
