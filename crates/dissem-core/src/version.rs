//! Version ordering for disseminated values.
//!
//! "Newest" is decided by two rules applied in order:
//! - Version counters compare with serial-number arithmetic over 32 bits, so
//!   the counter may wrap without leaving nodes stuck on an old value.
//! - Equal versions with different payloads (concurrent writers) are broken
//!   by the lexicographically greater payload.
//!
//! Both rules only look at the compared pair, so every node picks the same
//! winner without coordination.
//!
//! # References
//!
//! RFC 1982, "Serial Number Arithmetic"

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Half of the 32-bit counter space.
const HALF_SPACE: u32 = 1 << 31;

/// Version counter of a disseminated value.
///
/// Version 0 is reserved for "no value known" and is older than every other
/// version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u32);

impl Version {
    /// The "no value" version.
    pub const UNKNOWN: Self = Self(0);

    /// Wrap a raw counter.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw counter value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the "no value" version.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }

    /// The version following this one, wrapping and skipping 0.
    #[must_use]
    pub const fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }

    /// Compare two versions on the circular counter space.
    ///
    /// `Greater` means `self` is newer than `other`. When the two are exactly
    /// half the space apart the numerically greater one wins, which keeps the
    /// relation total. It is not transitive across more than half the space,
    /// which is why callers only ever compare two concrete versions.
    #[must_use]
    pub fn compare(self, other: Self) -> Ordering {
        if self.0 == other.0 {
            return Ordering::Equal;
        }
        match (self.is_unknown(), other.is_unknown()) {
            (true, _) => return Ordering::Less,
            (_, true) => return Ordering::Greater,
            _ => {}
        }

        let forward = self.0.wrapping_sub(other.0);
        match forward.cmp(&HALF_SPACE) {
            Ordering::Less => Ordering::Greater,
            Ordering::Greater => Ordering::Less,
            Ordering::Equal => self.0.cmp(&other.0),
        }
    }

    /// Whether `self` is strictly newer than `other`.
    #[must_use]
    pub fn is_newer_than(self, other: Self) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compare two `(version, payload)` pairs.
///
/// `Greater` means `a` should replace `b`. Equal versions fall back to
/// byte-wise payload comparison, so `Equal` is only returned for identical
/// pairs.
#[must_use]
pub fn compare_values(a: (Version, &[u8]), b: (Version, &[u8])) -> Ordering {
    match a.0.compare(b.0) {
        Ordering::Equal => a.1.cmp(b.1),
        ord => ord,
    }
}

/// Short digest of a payload, carried by summaries.
///
/// Lets two nodes at the same version notice that they hold different
/// payloads without exchanging the payloads themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(u32);

impl Digest {
    /// Digest of `payload`: the first four bytes of its BLAKE3 hash.
    #[must_use]
    pub fn of(payload: &[u8]) -> Self {
        let hash = blake3::hash(payload);
        let bytes = hash.as_bytes();
        Self(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Wrap a raw digest received from the wire.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw digest value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
