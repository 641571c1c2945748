//! Change notifications.
//!
//! Subscribers are plain callbacks run synchronously inside the call that
//! changed the value, before that call returns.

use crate::key::Key;
use crate::version::Version;
use serde::Serialize;
use std::fmt;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOrigin {
    /// A local `change` call
    Local,
    /// A newer value adopted from the network
    Remote,
}

/// A value change delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEvent<'a> {
    /// Key that changed
    pub key: Key,
    /// Version after the change
    pub version: Version,
    /// Payload after the change
    pub payload: &'a [u8],
    /// Local write or network update
    pub origin: ChangeOrigin,
}

type Callback = Box<dyn FnMut(&ChangeEvent<'_>) + Send>;

/// Identifier returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer list for one key.
#[derive(Default)]
pub struct Subscribers {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, Callback)>,
}

impl Subscribers {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ChangeEvent<'_>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(existing, _)| *existing != id);
        self.callbacks.len() != before
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run every callback with `event`, in subscription order.
    pub fn notify(&mut self, event: &ChangeEvent<'_>) {
        for (_, callback) in &mut self.callbacks {
            callback(event);
        }
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.callbacks.len())
            .finish()
    }
}
