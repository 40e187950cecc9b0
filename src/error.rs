// SPDX-License-Identifier: MIT
//! Error taxonomy shared by the decoders
//!
//! - [`FormatError`]: fatal, aborts the bundle or tree being decoded
//! - [`BoundsError`]: a field lies outside a record; local to that field
//! - [`ReadError`]: returned by operations that touch a byte stream

use crate::tree::TreeKind;

/// Structural problems that make a bundle or tree undecodable
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("invalid bundle signature (superseded DAT1 format is not supported)")]
    SupersededSignature,

    #[error("invalid file (not a PatchMaster bundle): signature {0:?}")]
    UnknownSignature([u8; 8]),

    #[error("magic number {0:#010x} does not match, wrong file type?")]
    BadMagic(u32),

    #[error("tree declares no levels")]
    NoLevels,

    #[error("tree buffer truncated: need {needed} bytes at offset {offset}, buffer has {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("record at level {level} exceeds the {depth} levels declared by the tree")]
    LevelOutOfRange { level: usize, depth: usize },

    #[error("negative size {size} declared for level {level}")]
    NegativeLevelSize { level: usize, size: i32 },

    #[error("bytes read ({read}) != bytes in buffer ({len})")]
    ByteCountMismatch { read: usize, len: usize },

    #[error("directory entry {extension} has negative start {start} or length {length}")]
    NegativeRange {
        extension: String,
        start: i32,
        length: i32,
    },

    #[error("bundle has no raw data section")]
    MissingRawData,

    #[error("{0} tree is missing or empty")]
    InvalidTree(TreeKind),

    #[error("max level {0} exceeds the trace level (4)")]
    MaxLevel(usize),

    #[error("amplifier state not available: {0}")]
    MissingAmplifierState(String),

    #[error("reference times are defined for the pulse tree, not the {0} tree")]
    NotPulseTree(TreeKind),

    #[error("no record with index {0}")]
    UnknownRecord(usize),

    #[error("record is at level {found}, expected level {expected}")]
    WrongLevel { expected: usize, found: usize },

    #[error("unknown trace data format {0}")]
    UnknownDataFormat(u8),

    #[error("interleave skip {skip} is smaller than block size {size}")]
    InvalidInterleave { size: i32, skip: i32 },
}

/// A field read that does not fit inside its record
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("offset {offset} + width {width} exceeds record length {len}")]
pub struct BoundsError {
    pub offset: usize,
    pub width: usize,
    pub len: usize,
}

/// Errors raised while decoding from a byte stream
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    Format(#[from] FormatError),

    #[error("Out of bounds: {0}")]
    Bounds(#[from] BoundsError),
}

impl ReadError {
    /// Whether this error is a structural format violation
    pub fn is_format(&self) -> bool {
        matches!(self, ReadError::Format(_))
    }
}
