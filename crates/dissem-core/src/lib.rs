//! # Dissem Core
//!
//! Eventual consistency for small shared variables over lossy broadcast
//! networks.
//!
//! This crate provides:
//! - Wraparound-safe version ordering with a deterministic tie-break
//! - Per-key value storage with activation gating
//! - Trickle timers that stay quiet while neighbours agree
//! - A sans-IO [`Node`] tying them together, and a seeded network simulator

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod key;
pub mod message;
pub mod node;
pub mod notify;
pub mod registry;
pub mod sim;
pub mod store;
pub mod trickle;
pub mod value;
pub mod version;

pub use key::Key;
pub use message::{Body, ImageGuid, Message};
pub use node::{Disposition, IgnoreReason, Node, NodeConfig};
pub use notify::{ChangeEvent, ChangeOrigin, SubscriptionId};
pub use registry::{KeyRegistry, RegistryError};
pub use store::{StoreError, ValueView};
pub use trickle::{ParamError, TrickleParams};
pub use value::{Handle, Payload};
pub use version::{Digest, Version};
