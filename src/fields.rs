// SPDX-License-Identifier: MIT
//! Field descriptors and value formatting
//!
//! A [`FieldDescriptor`] names one value inside a fixed-layout record:
//! display name, unit, [`FieldKind`] and byte offset. The formatter renders
//! a descriptor against any [`FieldRecord`] as text or as a JSON member.
//!
//! Out-of-bounds fields never abort a listing: the `format_*` functions
//! render them as [`NOT_AVAILABLE`]. Use [`try_format_value`] when the caller
//! needs the [`BoundsError`] itself.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::error::BoundsError;
use crate::format::{pulse, recording_mode};
use crate::record::{ByteSpan, FieldRecord, USER_PARAM_DESCR_SIZE};
use crate::time;
use crate::tree::Level;

/// Rendered in place of values that lie outside their record
pub const NOT_AVAILABLE: &str = "n/a";

/// Unit marker resolved to volts or amperes from the trace's recording mode
pub const UNIT_VOLTS_OR_AMPS: &str = "V|A";

const LIST_SEPARATOR: char = ';';

/// Closed name tables for byte-coded enumerations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumKind {
    RecordingMode,
    AmpMode,
    SegmentClass,
    IncrementMode,
    StoreKind,
    DataFormat,
}

impl EnumKind {
    pub fn names(self) -> &'static [&'static str] {
        match self {
            EnumKind::RecordingMode => &[
                "Inside-Out",
                "On-Cell",
                "Outside-Out",
                "Whole-Cell",
                "Current-Clamp",
                "Voltage-Clamp",
                "<none>",
            ],
            EnumKind::AmpMode => &["TestMode", "VCMode", "CCMode", "NoMode"],
            EnumKind::SegmentClass => &[
                "Constant",
                "Ramp",
                "Continuous",
                "ConstSine",
                "Squarewave",
                "ChirpWave",
            ],
            EnumKind::IncrementMode => &[
                "ModeInc",
                "ModeDec",
                "ModeIncInterleaved",
                "ModeDecInterleaved",
                "ModeAlternate",
                "ModeLogInc",
                "ModeLogDec",
                "ModeLogIncInterleaved",
                "ModeLogDecInterleaved",
                "ModeLogAlternate",
            ],
            EnumKind::StoreKind => &["NoStore", "Store", "StoreStart", "StoreEnd"],
            EnumKind::DataFormat => &["int16", "int32", "real32", "real64"],
        }
    }

    /// Name for a stored index, if it is in range
    pub fn name(self, index: u8) -> Option<&'static str> {
        self.names().get(index as usize).copied()
    }
}

/// How the bytes at a descriptor's offset are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Signed byte
    Byte,
    Int16,
    UInt16,
    /// 16-bit set, rendered as `b` followed by 16 binary digits (MSB first)
    Set16,
    /// A single bit of a 16-bit set, rendered `true`/`false`
    Set16Bit(u8),
    Int32,
    UInt32,
    /// IEEE double
    LongReal,
    /// Reciprocal of the stored double (e.g. conductance shown as resistance)
    InvLongReal,
    /// Stored timestamp rendered as UTC date and time
    DateTime,
    /// Stored timestamp minus the tree's reference time, 3 decimals
    RelativeTime,
    /// Zero-terminated string
    CString,
    /// String in a fixed-size field (8, 16, 32, 80 or 400 bytes)
    FixedString(usize),
    /// One-byte boolean
    Boolean,
    /// Block of consecutive doubles (2, 4, 8, 10 or 16)
    LongRealArray(usize),
    /// Block of (name, unit) user parameter descriptors (2, 4 or 8)
    UserParamDesc(usize),
    /// Byte index into a closed name table
    Enum(EnumKind),
}

impl FieldKind {
    /// Whether JSON output wraps this kind in quotes
    pub fn is_string_like(&self) -> bool {
        match self {
            FieldKind::Set16
            | FieldKind::DateTime
            | FieldKind::CString
            | FieldKind::FixedString(_)
            | FieldKind::Boolean
            | FieldKind::LongRealArray(_)
            | FieldKind::UserParamDesc(_)
            | FieldKind::Enum(_) => true,
            FieldKind::Byte
            | FieldKind::Int16
            | FieldKind::UInt16
            | FieldKind::Set16Bit(_)
            | FieldKind::Int32
            | FieldKind::UInt32
            | FieldKind::LongReal
            | FieldKind::InvLongReal
            | FieldKind::RelativeTime => false,
        }
    }
}

/// One named value in a fixed-layout record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub unit: &'static str,
    pub kind: FieldKind,
    pub offset: usize,
    /// Included in exports (tables, JSON, wave notes) by default
    pub export: bool,
    /// Included in printed parameter lists by default
    pub print: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, unit: &'static str, kind: FieldKind, offset: usize) -> Self {
        Self {
            name,
            unit,
            kind,
            offset,
            export: false,
            print: false,
        }
    }

    /// Mark as exported by default
    pub const fn exported(mut self) -> Self {
        self.export = true;
        self
    }

    /// Mark as printed by default
    pub const fn printed(mut self) -> Self {
        self.print = true;
        self
    }

    /// Header cell: `name` or `name[unit]`
    pub fn header(&self) -> String {
        if self.unit.is_empty() {
            self.name.to_string()
        } else {
            format!("{}[{}]", self.name, self.unit)
        }
    }
}

/// Render a double the way C's `%g` does (6 significant digits)
pub fn format_general(value: f64) -> String {
    const PRECISION: usize = 6;

    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:.*e}", PRECISION - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return value.to_string();
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return value.to_string();
    };

    if exponent < -4 || exponent >= PRECISION as i32 {
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        let decimals = (PRECISION as i32 - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn format_doubles(span: &ByteSpan<'_>, offset: usize, count: usize) -> (String, usize) {
    let mut out = String::from("(");
    let mut available = 0;
    for i in 0..count {
        if i > 0 {
            out.push(LIST_SEPARATOR);
        }
        match span.read::<f64>(offset + 8 * i) {
            Ok(v) => {
                available += 1;
                out.push_str(&format_general(v));
            }
            Err(_) => out.push_str(NOT_AVAILABLE),
        }
    }
    out.push(')');
    (out, available)
}

fn format_user_params(
    span: &ByteSpan<'_>,
    offset: usize,
    count: usize,
) -> Result<String, BoundsError> {
    let mut out = String::from("(name,unit):[");
    for i in 0..count {
        let param = span.read_user_param(offset + i * USER_PARAM_DESCR_SIZE)?;
        let _ = write!(out, "{}{}", param, LIST_SEPARATOR);
    }
    out.push(']');
    Ok(out)
}

/// Render a field's value, propagating out-of-bounds reads.
///
/// Double arrays render unavailable elements as `n/a` and only fail when
/// none of their elements lie inside the record.
pub fn try_format_value<R: FieldRecord + ?Sized>(
    record: &R,
    field: &FieldDescriptor,
) -> Result<String, BoundsError> {
    let span = record.span();
    let offset = field.offset;
    let text = match field.kind {
        FieldKind::Byte => span.read::<i8>(offset)?.to_string(),
        FieldKind::Int16 => span.read::<i16>(offset)?.to_string(),
        FieldKind::UInt16 => span.read::<u16>(offset)?.to_string(),
        FieldKind::Set16 => format!("b{:016b}", span.read::<u16>(offset)?),
        FieldKind::Set16Bit(bit) => {
            let set = span.read::<u16>(offset)?;
            (set & (1u16 << (bit & 15)) != 0).to_string()
        }
        FieldKind::Int32 => span.read::<i32>(offset)?.to_string(),
        FieldKind::UInt32 => span.read::<u32>(offset)?.to_string(),
        FieldKind::LongReal => format_general(span.read::<f64>(offset)?),
        FieldKind::InvLongReal => format_general(1.0 / span.read::<f64>(offset)?),
        FieldKind::DateTime => time::format_utc(span.read::<f64>(offset)?),
        FieldKind::RelativeTime => {
            let elapsed = span.read::<f64>(offset)? - record.reference_time();
            if elapsed.is_finite() {
                format!("{:.3}", elapsed)
            } else {
                format_general(elapsed)
            }
        }
        FieldKind::CString => span.read_string(offset)?.into_owned(),
        FieldKind::FixedString(width) => span.read_fixed_string_dyn(offset, width)?.into_owned(),
        FieldKind::Boolean => span.read_bool(offset)?.to_string(),
        FieldKind::LongRealArray(count) => {
            let (text, available) = format_doubles(&span, offset, count);
            if available == 0 && count > 0 {
                return Err(BoundsError {
                    offset,
                    width: 8 * count,
                    len: span.len(),
                });
            }
            text
        }
        FieldKind::UserParamDesc(count) => format_user_params(&span, offset, count)?,
        FieldKind::Enum(kind) => {
            let index = span.read::<u8>(offset)?;
            kind.name(index).unwrap_or(NOT_AVAILABLE).to_string()
        }
    };
    Ok(text)
}

/// Render a field's value; unavailable values become `n/a`
pub fn format_value<R: FieldRecord + ?Sized>(record: &R, field: &FieldDescriptor) -> String {
    match field.kind {
        // element-wise degradation even when the whole block is missing
        FieldKind::LongRealArray(count) => format_doubles(&record.span(), field.offset, count).0,
        _ => try_format_value(record, field).unwrap_or_else(|_| NOT_AVAILABLE.to_string()),
    }
}

/// The unit to show for `field` on `record`.
///
/// The volts-or-amps marker resolves from the recording mode of a trace
/// record; on other records it is returned unchanged.
pub fn resolve_unit<R: FieldRecord + ?Sized>(record: &R, field: &FieldDescriptor) -> &'static str {
    if field.unit == UNIT_VOLTS_OR_AMPS && record.level() == Some(Level::Trace.depth()) {
        match record.span().read::<u8>(pulse::TR_RECORDING_MODE) {
            Ok(recording_mode::C_CLAMP) => "A",
            _ => "V",
        }
    } else {
        field.unit
    }
}

/// `value unit`, or just `value` for unitless fields
pub fn format_value_with_unit<R: FieldRecord + ?Sized>(
    record: &R,
    field: &FieldDescriptor,
) -> String {
    let value = format_value(record, field);
    let unit = resolve_unit(record, field);
    if unit.is_empty() {
        value
    } else {
        format!("{} {}", value, unit)
    }
}

/// `name=value unit`
pub fn format_field<R: FieldRecord + ?Sized>(record: &R, field: &FieldDescriptor) -> String {
    format!("{}={}", field.name, format_value_with_unit(record, field))
}

/// Rendered text and whether JSON output must quote it
fn json_rendering<R: FieldRecord + ?Sized>(
    record: &R,
    field: &FieldDescriptor,
    include_unit: bool,
) -> (String, Option<serde_json::Value>) {
    if include_unit {
        return (format_value_with_unit(record, field), None);
    }
    let text = format_value(record, field);
    if field.kind.is_string_like() {
        return (text, None);
    }
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(bare @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => (text, Some(bare)),
        _ => (text, None),
    }
}

/// Render a field as one JSON object member: `"name": value`.
///
/// String-like kinds are quoted, and so is everything when the unit is
/// included so value and unit stay one JSON string. Numeric kinds are
/// emitted bare unless their rendering is not a JSON number (`n/a`, `inf`).
pub fn format_json<R: FieldRecord + ?Sized>(
    record: &R,
    field: &FieldDescriptor,
    include_unit: bool,
) -> String {
    let key = serde_json::Value::String(field.name.to_string());
    let (text, bare) = json_rendering(record, field, include_unit);
    let value: Cow<'_, str> = match bare {
        Some(_) => Cow::Borrowed(&text),
        None => Cow::Owned(serde_json::Value::String(text.clone()).to_string()),
    };
    format!("{}: {}", key, value)
}

/// The value [`format_json`] emits, as a JSON value
pub fn json_value<R: FieldRecord + ?Sized>(
    record: &R,
    field: &FieldDescriptor,
    include_unit: bool,
) -> serde_json::Value {
    match json_rendering(record, field, include_unit) {
        (_, Some(bare)) => bare,
        (text, None) => serde_json::Value::String(text),
    }
}
