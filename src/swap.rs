// SPDX-License-Identifier: MIT
//! Byte-order primitives
//!
//! Every multi-byte value in a bundle is stored in the byte order of the
//! machine that recorded it. Readers copy the raw bytes in host order and
//! reverse them when the owning tree (or trace) is flagged as swapped.

/// Reverse the byte order of a fixed-width value.
///
/// Implementations are pure and self-inverse: `x.swap_bytes().swap_bytes() == x`
/// holds bit-for-bit, including NaN payloads for floating point types.
pub trait SwapBytes: Copy {
    fn swap_bytes(self) -> Self;
}

/// A fixed-width value that can be reconstructed from host-order bytes.
pub trait Scalar: SwapBytes {
    /// Width in bytes
    const WIDTH: usize;

    /// Build a value from exactly `WIDTH` bytes in host order.
    ///
    /// Callers guarantee `bytes.len() == Self::WIDTH`.
    fn from_host_bytes(bytes: &[u8]) -> Self;

    /// Build a value from `WIDTH` bytes, reversing them first when `swapped`.
    #[inline]
    fn read_from(bytes: &[u8], swapped: bool) -> Self {
        let value = Self::from_host_bytes(bytes);
        if swapped {
            value.swap_bytes()
        } else {
            value
        }
    }
}

macro_rules! impl_int {
    ($($t:ty),*) => {$(
        impl SwapBytes for $t {
            #[inline]
            fn swap_bytes(self) -> Self {
                <$t>::swap_bytes(self)
            }
        }

        impl Scalar for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            #[inline]
            fn from_host_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }
        }
    )*};
}

impl_int!(u8, i8, i16, u16, i32, u32, i64, u64);

impl SwapBytes for f32 {
    #[inline]
    fn swap_bytes(self) -> Self {
        f32::from_bits(self.to_bits().swap_bytes())
    }
}

impl Scalar for f32 {
    const WIDTH: usize = 4;

    #[inline]
    fn from_host_bytes(bytes: &[u8]) -> Self {
        f32::from_bits(u32::from_host_bytes(bytes))
    }
}

impl SwapBytes for f64 {
    #[inline]
    fn swap_bytes(self) -> Self {
        f64::from_bits(self.to_bits().swap_bytes())
    }
}

impl Scalar for f64 {
    const WIDTH: usize = 8;

    #[inline]
    fn from_host_bytes(bytes: &[u8]) -> Self {
        f64::from_bits(u64::from_host_bytes(bytes))
    }
}

/// Whether the running machine stores integers little-endian.
#[inline]
pub const fn host_is_little_endian() -> bool {
    cfg!(target_endian = "little")
}
