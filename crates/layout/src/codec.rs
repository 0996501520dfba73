//! Big-endian encoding of the fixed-width integers used on disk.
//!
//! The wire order is fixed: every integer in a protostream file is stored
//! big-endian regardless of the host.

use byteorder::{BigEndian, ByteOrder};
use std::fmt::Debug;

mod sealed {
    pub trait Sealed {}

    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// An unsigned integer with a fixed big-endian wire representation.
pub trait BeInt: sealed::Sealed + Copy + Eq + Debug + Default {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// The encoded form, `[u8; WIDTH]`.
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default + Copy + Debug;

    /// Decodes from the first `WIDTH` bytes of `buf`.
    fn read_be(buf: &[u8]) -> Self;

    /// Encodes into the first `WIDTH` bytes of `buf`.
    fn write_be(self, buf: &mut [u8]);
}

macro_rules! impl_be_int {
    ($ty:ty, $width:expr, $read:ident, $write:ident) => {
        impl BeInt for $ty {
            const WIDTH: usize = $width;
            type Bytes = [u8; $width];

            #[inline]
            fn read_be(buf: &[u8]) -> Self {
                BigEndian::$read(buf)
            }

            #[inline]
            fn write_be(self, buf: &mut [u8]) {
                BigEndian::$write(buf, self)
            }
        }
    };
}

impl_be_int!(u16, 2, read_u16, write_u16);
impl_be_int!(u32, 4, read_u32, write_u32);
impl_be_int!(u64, 8, read_u64, write_u64);

/// Encodes `value` into its big-endian byte array.
pub fn encode_be<T: BeInt>(value: T) -> T::Bytes {
    let mut bytes = T::Bytes::default();
    value.write_be(bytes.as_mut());
    bytes
}

/// Decodes a big-endian integer from the start of `buf`, whatever its alignment.
///
/// # Panics
///
/// Panics if `buf` is shorter than `T::WIDTH`.
pub fn decode_be<T: BeInt>(buf: &[u8]) -> T {
    T::read_be(buf)
}

/// Decodes a big-endian integer from a buffer aligned to `T::WIDTH`.
///
/// # Panics
///
/// Panics if `buf` is shorter than `T::WIDTH`; debug builds also panic when
/// `buf` is misaligned.
pub fn decode_be_aligned<T: BeInt>(buf: &[u8]) -> T {
    debug_assert!(is_aligned::<T>(buf), "misaligned read of {} bytes", T::WIDTH);
    T::read_be(buf)
}

/// Encodes `value` into a buffer aligned to `T::WIDTH`.
///
/// # Panics
///
/// Same conditions as [`decode_be_aligned`].
pub fn encode_be_aligned<T: BeInt>(value: T, buf: &mut [u8]) {
    debug_assert!(is_aligned::<T>(buf), "misaligned write of {} bytes", T::WIDTH);
    value.write_be(buf)
}

fn is_aligned<T: BeInt>(buf: &[u8]) -> bool {
    buf.as_ptr() as usize % T::WIDTH == 0
}
