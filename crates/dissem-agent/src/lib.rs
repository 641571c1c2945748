//! # Dissem Agent
//!
//! Runs one dissemination node over UDP.
//!
//! ## Architecture
//!
//! A single task owns the [`Node`](dissem_core::Node) and multiplexes:
//! 1. **Receive**: frames from the socket, handed to the node
//! 2. **Timers**: trickle deadlines, turned into outgoing frames
//! 3. **Console**: `get`/`set`/`change`/`keys` commands read from stdin

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod console;
pub mod runtime;
pub mod transport;

pub use config::{AgentConfig, KeyConfig};
pub use runtime::Agent;
