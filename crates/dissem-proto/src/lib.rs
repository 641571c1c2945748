//! # Dissem Protocol
//!
//! Binary framing for announcements sent over a datagram medium.
//!
//! ## Frames
//!
//! - Summary: flags, key, version, payload digest
//! - Data: flags, key, version, full payload
//!
//! Either kind may carry the sender's 16-byte image GUID.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frame;
pub mod limits;

pub use frame::{decode, encode, FrameError};
pub use limits::{max_value_size, min_mtu, DATA_HEADER, GUID_LEN, SUMMARY_HEADER};
