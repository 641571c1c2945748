//! Fixed-size typed values.
//!
//! A [`Payload`] type has one encoded size, known at compile time, which
//! becomes the registered size of any key holding it.

use crate::key::Key;
use std::fmt;
use std::marker::PhantomData;

/// A type that encodes to exactly [`SIZE`](Payload::SIZE) bytes.
pub trait Payload: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write the encoding into `out`, which is exactly `SIZE` bytes long.
    fn encode(&self, out: &mut [u8]);

    /// Read a value back from exactly `SIZE` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! int_payload {
    ($($ty:ty),*) => {
        $(
            impl Payload for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_be_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut buf = [0_u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_be_bytes(buf)
                }
            }
        )*
    };
}

int_payload!(u8, u16, u32, u64, i8, i16, i32, i64);

impl<const N: usize> Payload for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, out: &mut [u8]) {
        out.copy_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut buf = [0_u8; N];
        buf.copy_from_slice(bytes);
        buf
    }
}

/// Typed reference to a registered key.
///
/// Obtained from [`Node::register_typed`](crate::Node::register_typed); the
/// registered size always equals `T::SIZE`.
pub struct Handle<T> {
    key: Key,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(key: Key) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    /// The key behind this handle.
    #[must_use]
    pub fn key(&self) -> Key {
        self.key
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.key).finish()
    }
}

pub(crate) fn encode_to_vec<T: Payload>(value: &T) -> Vec<u8> {
    let mut buf = vec![0_u8; T::SIZE];
    value.encode(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let value: u32 = 0x0102_0304;
        assert_eq!(encode_to_vec(&value), vec![1, 2, 3, 4]);
        assert_eq!(u32::decode(&[1, 2, 3, 4]), value);
        assert_eq!(i16::decode(&encode_to_vec(&-2_i16)), -2);
    }

    #[test]
    fn byte_arrays_pass_through() {
        let value = [9_u8, 8, 7];
        assert_eq!(<[u8; 3]>::SIZE, 3);
        assert_eq!(<[u8; 3]>::decode(&encode_to_vec(&value)), value);
    }
}
