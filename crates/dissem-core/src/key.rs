//! Key namespace for disseminated variables.
//!
//! Keys are 16-bit. The most significant bit splits the space in two halves:
//!
//! | Range | Meaning |
//! |-------|---------|
//! | `0x0000..=0x7FFF` | Statically assigned (hand-picked, overridable by configuration) |
//! | `0x8000..=0xFFFF` | Generated (handed out by the registry at startup) |
//!
//! Two producers must never share a key, whichever half it comes from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bit marking a key as generated.
pub const GENERATED_BIT: u16 = 0x8000;

/// Identifier of a disseminated variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(u16);

impl Key {
    /// Build a key from its raw wire value.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Build a statically assigned key.
    ///
    /// # Errors
    ///
    /// Returns error if `value` falls into the generated half of the space.
    pub fn assigned(value: u16) -> Result<Self, KeyError> {
        if value & GENERATED_BIT != 0 {
            return Err(KeyError::ReservedBit(value));
        }
        Ok(Self(value))
    }

    /// Build the generated key with the given index.
    ///
    /// # Errors
    ///
    /// Returns error if `index` does not fit in the generated half.
    pub fn generated(index: u16) -> Result<Self, KeyError> {
        if index & GENERATED_BIT != 0 {
            return Err(KeyError::ReservedBit(index));
        }
        Ok(Self(index | GENERATED_BIT))
    }

    /// Raw wire value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Whether this key belongs to the generated half.
    #[must_use]
    pub const fn is_generated(self) -> bool {
        self.0 & GENERATED_BIT != 0
    }

    /// Index within its half of the namespace.
    #[must_use]
    pub const fn index(self) -> u16 {
        self.0 & !GENERATED_BIT
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<Key> for u16 {
    fn from(key: Key) -> Self {
        key.0
    }
}

/// Errors building keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Value collides with the generated-key marker bit
    #[error("value {0:#06x} uses the reserved generated-key bit")]
    ReservedBit(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_keys_stay_in_lower_half() {
        let key = Key::assigned(5).unwrap();
        assert!(!key.is_generated());
        assert_eq!(key.raw(), 5);

        assert_eq!(
            Key::assigned(0x8001),
            Err(KeyError::ReservedBit(0x8001))
        );
    }

    #[test]
    fn generated_keys_carry_marker_bit() {
        let key = Key::generated(3).unwrap();
        assert!(key.is_generated());
        assert_eq!(key.raw(), 0x8003);
        assert_eq!(key.index(), 3);
        assert_ne!(key, Key::assigned(3).unwrap());
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(Key::from_raw(0x8003).to_string(), "0x8003");
    }
}
