// SPDX-License-Identifier: MIT
//! Trace sample decoding
//!
//! A trace record locates its samples in the raw data section of the bundle:
//! file offset, point count, sample format and scale factor. Samples may be
//! stored in interleaved blocks, in which case `interleave_skip` is the
//! distance from one block start to the next.

use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FormatError, ReadError};
use crate::export::hierarchy_json;
use crate::format::{data_kind, pulse, recording_mode};
use crate::selection::{FieldSelection, TraceNaming};
use crate::swap::{host_is_little_endian, Scalar};
use crate::tree::{Level, Record};

/// Sample encoding of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Int16,
    Int32,
    Float32,
    Float64,
}

impl DataFormat {
    pub fn from_byte(byte: u8) -> Result<Self, FormatError> {
        match byte {
            0 => Ok(DataFormat::Int16),
            1 => Ok(DataFormat::Int32),
            2 => Ok(DataFormat::Float32),
            3 => Ok(DataFormat::Float64),
            other => Err(FormatError::UnknownDataFormat(other)),
        }
    }

    /// Bytes per sample
    pub fn width(self) -> usize {
        match self {
            DataFormat::Int16 => 2,
            DataFormat::Int32 | DataFormat::Float32 => 4,
            DataFormat::Float64 => 8,
        }
    }
}

/// Where and how a trace's samples are stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub data_offset: u64,
    pub points: usize,
    pub kind: u16,
    pub format: DataFormat,
    pub scaler: f64,
    pub x_start: f64,
    pub x_interval: f64,
    pub x_unit: String,
    pub y_unit: String,
    /// Block size in bytes, 0 if not interleaved
    pub interleave_size: i32,
    /// Block start to block start, in bytes
    pub interleave_skip: i32,
}

impl TraceInfo {
    pub fn from_record(trace: &Record<'_>) -> Result<Self, ReadError> {
        trace.expect_level(Level::Trace)?;
        let data: i32 = trace.read(pulse::TR_DATA)?;
        let points: i32 = trace.read(pulse::TR_DATA_POINTS)?;
        if data < 0 || points < 0 {
            return Err(FormatError::NegativeRange {
                extension: "trace".to_string(),
                start: data,
                length: points,
            }
            .into());
        }
        Ok(Self {
            data_offset: data as u64,
            points: points as usize,
            kind: trace.read(pulse::TR_DATA_KIND)?,
            format: DataFormat::from_byte(trace.read(pulse::TR_DATA_FORMAT)?)?,
            scaler: trace.read(pulse::TR_DATA_SCALER)?,
            x_start: trace.read(pulse::TR_X_START)?,
            x_interval: trace.read(pulse::TR_X_INTERVAL)?,
            x_unit: trace.read_fixed_string::<8>(pulse::TR_X_UNIT)?.into_owned(),
            y_unit: trace.read_fixed_string::<8>(pulse::TR_Y_UNIT)?.into_owned(),
            // older layouts end before the interleave fields
            interleave_size: trace.read_or(pulse::TR_INTERLEAVE_SIZE, 0),
            interleave_skip: trace.read_or(pulse::TR_INTERLEAVE_SKIP, 0),
        })
    }

    /// Whether samples were written in the opposite byte order
    pub fn is_swapped(&self) -> bool {
        (self.kind & data_kind::LITTLE_ENDIAN != 0) != host_is_little_endian()
    }

    /// Total sample bytes
    pub fn byte_len(&self) -> u64 {
        self.points as u64 * self.format.width() as u64
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleave_size > 0
    }

    /// The JSON object written next to exported samples
    pub fn sidecar_json(&self, params: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "x_0": self.x_start,
            "delta_x": self.x_interval,
            "numpnts": self.points,
            "unit_x": self.x_unit,
            "unit_y": self.y_unit,
            "params": params,
        })
    }
}

/// Sidecar JSON for `trace` with the selected fields of it and its ancestors
pub fn trace_sidecar(
    trace: &Record<'_>,
    selection: &FieldSelection,
) -> Result<serde_json::Value, ReadError> {
    let info = TraceInfo::from_record(trace)?;
    Ok(info.sidecar_json(hierarchy_json(trace, selection, false)))
}

fn short_read(expected: u64, got: usize) -> ReadError {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("trace data: expected {} bytes, got {}", expected, got),
    )
    .into()
}

fn read_raw<R: Read + Seek>(reader: &mut R, info: &TraceInfo) -> Result<Vec<u8>, ReadError> {
    let total = info.byte_len();
    reader.seek(SeekFrom::Start(info.data_offset))?;
    let mut raw = Vec::new();

    if !info.is_interleaved() {
        reader.by_ref().take(total).read_to_end(&mut raw)?;
        if raw.len() as u64 != total {
            return Err(short_read(total, raw.len()));
        }
        return Ok(raw);
    }

    if info.interleave_skip < info.interleave_size {
        return Err(FormatError::InvalidInterleave {
            size: info.interleave_size,
            skip: info.interleave_skip,
        }
        .into());
    }
    let block = info.interleave_size as u64;
    let gap = i64::from(info.interleave_skip - info.interleave_size);
    let mut remaining = total;
    while remaining > 0 {
        let chunk = remaining.min(block);
        let before = raw.len();
        reader.by_ref().take(chunk).read_to_end(&mut raw)?;
        if (raw.len() - before) as u64 != chunk {
            return Err(short_read(total, raw.len()));
        }
        remaining -= chunk;
        if remaining > 0 {
            reader.seek(SeekFrom::Current(gap))?;
        }
    }
    Ok(raw)
}

fn convert<T: Scalar + Into<f64>>(raw: &[u8], swapped: bool, scaler: f64) -> Vec<f64> {
    raw.chunks_exact(T::WIDTH)
        .map(|bytes| scaler * T::read_from(bytes, swapped).into())
        .collect()
}

/// Read, byte-swap and scale the samples of a trace
pub fn read_trace<R: Read + Seek>(reader: &mut R, info: &TraceInfo) -> Result<Vec<f64>, ReadError> {
    let raw = read_raw(reader, info)?;
    let swapped = info.is_swapped();
    let samples = match info.format {
        DataFormat::Int16 => convert::<i16>(&raw, swapped, info.scaler),
        DataFormat::Int32 => convert::<i32>(&raw, swapped, info.scaler),
        DataFormat::Float32 => convert::<f32>(&raw, swapped, info.scaler),
        DataFormat::Float64 => convert::<f64>(&raw, swapped, info.scaler),
    };
    debug!(
        offset = info.data_offset,
        points = samples.len(),
        interleaved = info.is_interleaved(),
        "trace read"
    );
    Ok(samples)
}

/// Display name of a trace: monitor label, own label, leak label or `trace_<count>`
pub fn trace_name(trace: &Record<'_>, count: usize, naming: &TraceNaming) -> String {
    let kind: u16 = trace.read_or(pulse::TR_DATA_KIND, 0);
    if kind & data_kind::IS_IMON != 0 && !naming.imon.is_empty() {
        return naming.imon.clone();
    }
    if kind & data_kind::IS_VMON != 0 && !naming.vmon.is_empty() {
        return naming.vmon.clone();
    }
    let label = trace
        .read_fixed_string::<32>(pulse::TR_LABEL)
        .unwrap_or_default();
    if !label.is_empty() {
        label.into_owned()
    } else if kind & data_kind::IS_LEAK != 0 {
        naming.leak.clone()
    } else {
        format!("trace_{}", count)
    }
}

/// Holding level of a trace and its unit (`A` in current clamp, else `V`)
pub fn trace_holding(trace: &Record<'_>) -> Result<(f64, &'static str), ReadError> {
    trace.expect_level(Level::Trace)?;
    let holding: f64 = trace.read(pulse::TR_HOLDING)?;
    let unit = match trace.read::<u8>(pulse::TR_RECORDING_MODE)? {
        recording_mode::C_CLAMP => "A",
        _ => "V",
    };
    Ok((holding, unit))
}
