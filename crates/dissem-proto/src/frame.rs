//! Frame encoding and decoding.
//!
//! All integers are big-endian:
//!
//! ```text
//! flags:u8 key:u16 version:u32 [digest:u32] [guid:16] [payload..]
//! ```
//!
//! `digest` is present on summaries only, `payload` on data frames only and
//! `guid` whenever [`FLAG_GUID`] is set.

use crate::limits::{DATA_HEADER, GUID_LEN, SUMMARY_HEADER};
use dissem_core::{Body, Digest, ImageGuid, Key, Message, Version};

/// Frame carries a full payload.
pub const FLAG_DATA: u8 = 0b0000_0001;

/// Frame carries the sender's image GUID.
pub const FLAG_GUID: u8 = 0b0000_0010;

const KNOWN_FLAGS: u8 = FLAG_DATA | FLAG_GUID;

/// Errors for frame decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Frame ended before a required field
    #[error("truncated frame: need {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required so far
        expected: usize,
        /// Bytes available
        actual: usize,
    },
    /// Reserved flag bits are set
    #[error("unknown flags {0:#04x}")]
    UnknownFlags(u8),
    /// Data frame without payload bytes
    #[error("data frame has an empty payload")]
    EmptyPayload,
    /// Summary frame with bytes after its last field
    #[error("{0} trailing bytes after summary")]
    TrailingBytes(usize),
}

/// Encode a message into a single frame.
#[must_use]
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut flags = 0;
    if msg.is_data() {
        flags |= FLAG_DATA;
    }
    if msg.origin.is_some() {
        flags |= FLAG_GUID;
    }

    let payload_len = msg.payload().map_or(0, <[u8]>::len);
    let mut bytes = Vec::with_capacity(SUMMARY_HEADER + GUID_LEN + payload_len);
    bytes.push(flags);
    bytes.extend_from_slice(&msg.key.raw().to_be_bytes());
    bytes.extend_from_slice(&msg.version.raw().to_be_bytes());
    if let Body::Summary { digest } = &msg.body {
        bytes.extend_from_slice(&digest.raw().to_be_bytes());
    }
    if let Some(guid) = &msg.origin {
        bytes.extend_from_slice(guid.as_bytes());
    }
    if let Some(payload) = msg.payload() {
        bytes.extend_from_slice(payload);
    }
    bytes
}

/// Decode one frame.
///
/// # Errors
///
/// Returns error if the frame is truncated, sets unknown flag bits, is a
/// data frame without payload or a summary with trailing bytes.
pub fn decode(bytes: &[u8]) -> Result<Message, FrameError> {
    let mut reader = Reader { bytes, pos: 0 };

    let flags = reader.array::<1>()?[0];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FrameError::UnknownFlags(flags));
    }
    let key = Key::from_raw(u16::from_be_bytes(reader.array()?));
    let version = Version::from_raw(u32::from_be_bytes(reader.array()?));
    debug_assert_eq!(reader.pos, DATA_HEADER);

    let is_data = flags & FLAG_DATA != 0;
    let digest = if is_data {
        None
    } else {
        Some(Digest::from_raw(u32::from_be_bytes(reader.array()?)))
    };
    let origin = if flags & FLAG_GUID != 0 {
        Some(ImageGuid::from_bytes(reader.array()?))
    } else {
        None
    };

    let rest = reader.rest();
    let body = match digest {
        Some(digest) if rest.is_empty() => Body::Summary { digest },
        Some(_) => return Err(FrameError::TrailingBytes(rest.len())),
        None if rest.is_empty() => return Err(FrameError::EmptyPayload),
        None => Body::Data {
            payload: rest.to_vec(),
        },
    };

    Ok(Message {
        key,
        version,
        body,
        origin,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let end = self.pos + N;
        let field = self
            .bytes
            .get(self.pos..end)
            .and_then(|s| <[u8; N]>::try_from(s).ok())
            .ok_or(FrameError::Truncated {
                expected: end,
                actual: self.bytes.len(),
            })?;
        self.pos = end;
        Ok(field)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
