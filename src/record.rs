// SPDX-License-Identifier: MIT
//! Bounds-checked typed access to fixed-layout records
//!
//! A [`ByteSpan`] is a borrowed record body plus the byte-swap flag inherited
//! from its tree. All reads are checked against the span length; the
//! `*_or` variants substitute a caller-chosen default instead of failing,
//! which is how fields missing from older file revisions are handled.

use std::borrow::Cow;

use crate::error::BoundsError;
use crate::swap::Scalar;

/// Size of one user parameter descriptor (32-byte name + 8-byte unit)
pub const USER_PARAM_DESCR_SIZE: usize = 40;
const USER_PARAM_NAME_SIZE: usize = 32;
const USER_PARAM_UNIT_SIZE: usize = 8;

/// Borrowed record bytes with their byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan<'a> {
    data: &'a [u8],
    swapped: bool,
}

impl<'a> ByteSpan<'a> {
    pub fn new(data: &'a [u8], swapped: bool) -> Self {
        Self { data, swapped }
    }

    /// Length of the record in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw record bytes
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Whether multi-byte reads reverse byte order
    #[inline]
    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    #[inline]
    fn window(&self, offset: usize, width: usize) -> Result<&'a [u8], BoundsError> {
        let end = offset.checked_add(width).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => Ok(&self.data[offset..end]),
            None => Err(BoundsError {
                offset,
                width,
                len: self.data.len(),
            }),
        }
    }

    /// Read a value at `offset` (needn't be aligned), swapping if needed
    #[inline]
    pub fn read<T: Scalar>(&self, offset: usize) -> Result<T, BoundsError> {
        self.window(offset, T::WIDTH)
            .map(|bytes| T::read_from(bytes, self.swapped))
    }

    /// Read a value at `offset`, or `default` if it lies outside the record
    #[inline]
    pub fn read_or<T: Scalar>(&self, offset: usize, default: T) -> T {
        self.read(offset).unwrap_or(default)
    }

    /// Read a double, NaN if it lies outside the record
    #[inline]
    pub fn read_f64_or_nan(&self, offset: usize) -> f64 {
        self.read_or(offset, f64::NAN)
    }

    /// Read a one-byte boolean
    pub fn read_bool(&self, offset: usize) -> Result<bool, BoundsError> {
        self.read::<u8>(offset).map(|b| b != 0)
    }

    /// Read a zero-terminated string starting at `offset`.
    ///
    /// The string ends at the first NUL or at the end of the record.
    pub fn read_string(&self, offset: usize) -> Result<Cow<'a, str>, BoundsError> {
        if offset >= self.data.len() {
            return Err(BoundsError {
                offset,
                width: 1,
                len: self.data.len(),
            });
        }
        Ok(latin1(until_nul(&self.data[offset..])))
    }

    /// Read a string stored in a fixed `N`-byte field.
    ///
    /// Some producers do not zero-initialise these fields, so the last byte
    /// may be non-zero. The result then runs to the first NUL inside the
    /// window, or covers all `N` bytes if there is none.
    pub fn read_fixed_string<const N: usize>(
        &self,
        offset: usize,
    ) -> Result<Cow<'a, str>, BoundsError> {
        self.read_fixed_string_dyn(offset, N)
    }

    /// Like [`Self::read_fixed_string`] with the field width given at runtime
    pub fn read_fixed_string_dyn(
        &self,
        offset: usize,
        width: usize,
    ) -> Result<Cow<'a, str>, BoundsError> {
        let window = self.window(offset, width)?;
        // a terminated field and an unterminated one with stray bytes both end
        // at the first NUL inside the window; never read past it
        Ok(latin1(until_nul(window)))
    }

    /// Read a (name, unit) user parameter descriptor
    pub fn read_user_param(&self, offset: usize) -> Result<UserParamDescr<'a>, BoundsError> {
        self.window(offset, USER_PARAM_DESCR_SIZE)?;
        Ok(UserParamDescr {
            name: self.read_fixed_string::<USER_PARAM_NAME_SIZE>(offset)?,
            unit: self.read_fixed_string::<USER_PARAM_UNIT_SIZE>(offset + USER_PARAM_NAME_SIZE)?,
        })
    }

    /// Sub-record of `width` bytes starting at `offset`
    pub fn sub_span(&self, offset: usize, width: usize) -> Result<ByteSpan<'a>, BoundsError> {
        Ok(ByteSpan::new(self.window(offset, width)?, self.swapped))
    }
}

/// Name and unit of a user-defined parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserParamDescr<'a> {
    pub name: Cow<'a, str>,
    pub unit: Cow<'a, str>,
}

impl std::fmt::Display for UserParamDescr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.name, self.unit)
    }
}

/// Anything the field formatter can read from
///
/// Tree records carry a hierarchy level and see their tree's reference time;
/// detached spans (e.g. an amplifier state embedded in a series record) do not.
pub trait FieldRecord {
    fn span(&self) -> ByteSpan<'_>;

    /// Hierarchy level, if the bytes belong to a tree record
    fn level(&self) -> Option<usize> {
        None
    }

    /// Time zero for relative-time fields
    fn reference_time(&self) -> f64 {
        f64::NAN
    }
}

impl FieldRecord for ByteSpan<'_> {
    fn span(&self) -> ByteSpan<'_> {
        *self
    }
}

#[inline]
fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Decode ISO-8859-1 text, borrowing when it is plain ASCII
pub fn latin1(bytes: &[u8]) -> Cow<'_, str> {
    if bytes.is_ascii() {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return Cow::Borrowed(text);
        }
    }
    Cow::Owned(bytes.iter().map(|&b| b as char).collect())
}
