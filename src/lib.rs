// SPDX-License-Identifier: MIT
//! # PatchMaster bundle reader
//!
//! Decoder for bundled `.dat` recordings: one file holding several record
//! trees (pulse data, stimulus protocol, amplifier state) and a raw sample
//! section.
//!
//! ## Format Overview
//!
//! ```text
//! Bundle envelope (256 bytes, byte order of the recording machine):
//! - Signature: "DAT2\0\0\0\0" (8 bytes); "DAT1" is recognized but rejected
//! - Creator version: zero padded text (32 bytes)
//! - Creation time: f64 seconds, PatchMaster epoch (offset 40)
//! - Item count: i32, clamped to 12 (offset 48)
//! - Little-endian flag: u8 (offset 52)
//! - Directory: 12 × (i32 start, i32 length, 8-byte extension) (offset 64)
//!
//! Items, dispatched by extension:
//! - .pul  pulse tree     Root > Group > Series > Sweep > Trace
//! - .pgf  stimulus tree  Root > Stimulation > Channel > Segment
//! - .amp  amplifier tree Root > State > Amplifier
//! - .dat  raw samples, read per trace
//!
//! Tree:
//! - Magic: u32 "Tree" (or byte-swapped)
//! - Level count and one record size per level
//! - Records in pre-order, each followed by its child count
//! ```
//!
//! Field values are described by constant descriptor tables ([`tables`]) and
//! rendered by [`fields`]; which fields are exported or printed is a
//! [`FieldSelection`] passed explicitly, loadable from TOML.
//!
//! ## Usage
//!
//! ```no_run
//! use pmdat_reader::{metadata_table, Bundle, FieldSelection};
//!
//! let bundle = Bundle::open("recording.dat")?;
//! println!("{} created {}", bundle.version(), bundle.file_date_utc());
//!
//! let table = metadata_table(bundle.pulse_tree(), &FieldSelection::default(), 4)?;
//! print!("{}", table);
//!
//! let stimulus = bundle.stimulus()?;
//! let waveform = stimulus.stimulation(0)?.construct_stim_trace(0)?;
//! println!("{} breakpoints", waveform.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Decoding is synchronous. A decoded [`Bundle`] is read-only apart from
//! [`Tree::set_reference_time`]; trace sample reads seek the underlying
//! stream and must not share one handle concurrently.

pub mod bundle;
pub mod error;
pub mod export;
pub mod fields;
pub mod format;
pub mod record;
pub mod selection;
pub mod stim;
pub mod swap;
pub mod tables;
pub mod time;
pub mod trace;
pub mod tree;

// Re-export main types
pub use bundle::{AmplifierState, Bundle, BundleStats, DataRange, DecodeOptions, FormatVersion};
pub use error::{BoundsError, FormatError, ReadError};
pub use export::{hierarchy_json, metadata_table, write_metadata_table};
pub use fields::{format_json, format_value, format_value_with_unit, FieldDescriptor, FieldKind};
pub use format::{BundleHeader, BundleItem, BUNDLE_HEADER_SIZE, BUNDLE_SIGNATURE};
pub use record::{ByteSpan, FieldRecord};
pub use selection::{ConfigError, FieldSelection, Settings, TraceNaming};
pub use stim::{IncrementPolicy, StandardIncrement, StimError, StimPoint, StimTree, Stimulation};
pub use swap::{Scalar, SwapBytes};
pub use tables::FieldTable;
pub use trace::{read_trace, trace_holding, trace_name, trace_sidecar, DataFormat, TraceInfo};
pub use tree::{Level, NodeId, Record, Tree, TreeKind};
