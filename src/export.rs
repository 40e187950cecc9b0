// SPDX-License-Identifier: MIT
//! Bulk formatting: parameter lists, JSON objects and tables
//!
//! Every helper renders field by field, so a field outside its record only
//! turns into an `n/a` cell and never aborts the listing.

use std::fmt::Write as _;
use std::io::Write;

use tracing::debug;

use crate::error::{FormatError, ReadError};
use crate::fields::{self, FieldDescriptor, NOT_AVAILABLE, UNIT_VOLTS_OR_AMPS};
use crate::format::pulse;
use crate::record::FieldRecord;
use crate::selection::FieldSelection;
use crate::tables::FieldTable;
use crate::tree::{Level, Record, Tree, TreeKind};

/// Leading columns of the metadata table
pub const COUNT_HEADERS: [&str; 4] = ["GrpCount", "SerCount", "SwCount", "TrCount"];

const PULSE_TABLES: [FieldTable; 5] = [
    FieldTable::Root,
    FieldTable::Group,
    FieldTable::Series,
    FieldTable::Sweep,
    FieldTable::Trace,
];

fn lines<'f, R: FieldRecord + ?Sized>(
    record: &R,
    fields: impl Iterator<Item = &'f FieldDescriptor>,
) -> String {
    let mut out = String::new();
    for field in fields {
        let _ = writeln!(out, "{}", fields::format_field(record, field));
    }
    out
}

/// Every field of `fields`, one `name=value unit` line each
pub fn format_param_list<R: FieldRecord + ?Sized>(record: &R, fields: &[FieldDescriptor]) -> String {
    lines(record, fields.iter())
}

/// Fields selected for printing, one line each
pub fn format_print_list<R: FieldRecord + ?Sized>(
    record: &R,
    table: FieldTable,
    selection: &FieldSelection,
) -> String {
    lines(record, selection.printed(table))
}

/// Fields selected for export, one line each (wave note style)
pub fn format_export_list<R: FieldRecord + ?Sized>(
    record: &R,
    table: FieldTable,
    selection: &FieldSelection,
) -> String {
    lines(record, selection.exported(table))
}

/// Exported fields as a JSON object: `{ "a": 1, "b": "x" }`
pub fn format_json_object<R: FieldRecord + ?Sized>(
    record: &R,
    table: FieldTable,
    selection: &FieldSelection,
    include_unit: bool,
) -> String {
    let members: Vec<String> = selection
        .exported(table)
        .map(|field| fields::format_json(record, field, include_unit))
        .collect();
    format!("{{ {} }}", members.join(", "))
}

/// Exported fields as a `serde_json` object
pub fn json_object<R: FieldRecord + ?Sized>(
    record: &R,
    table: FieldTable,
    selection: &FieldSelection,
    include_unit: bool,
) -> serde_json::Map<String, serde_json::Value> {
    selection
        .exported(table)
        .map(|field| {
            (
                field.name.to_string(),
                fields::json_value(record, field, include_unit),
            )
        })
        .collect()
}

/// Exported fields of a trace and all its ancestors, keyed by level name
pub fn hierarchy_json(
    trace: &Record<'_>,
    selection: &FieldSelection,
    include_unit: bool,
) -> serde_json::Value {
    let mut levels = serde_json::Map::new();
    for table in PULSE_TABLES {
        let level = match table {
            FieldTable::Root => Level::Root,
            FieldTable::Group => Level::Group,
            FieldTable::Series => Level::Series,
            FieldTable::Sweep => Level::Sweep,
            _ => Level::Trace,
        };
        if let Some(record) = trace.ancestor(level) {
            let object = json_object(&record, table, selection, include_unit);
            levels.insert(table.name().to_string(), serde_json::Value::Object(object));
        }
    }
    serde_json::Value::Object(levels)
}

/// Header cells of the exported fields: `name` or `name[unit]`.
///
/// Rows of one table may mix clamp modes, so fields whose unit depends on
/// the recording mode get their bare name.
pub fn table_headers(table: FieldTable, selection: &FieldSelection) -> Vec<String> {
    selection
        .exported(table)
        .map(|field| {
            if field.unit == UNIT_VOLTS_OR_AMPS {
                field.name.to_string()
            } else {
                field.header()
            }
        })
        .collect()
}

/// Value cells of the exported fields
pub fn table_row<R: FieldRecord + ?Sized>(
    record: &R,
    table: FieldTable,
    selection: &FieldSelection,
) -> Vec<String> {
    selection
        .exported(table)
        .map(|field| fields::format_value(record, field))
        .collect()
}

fn count_cell(record: &Record<'_>, offset: usize) -> String {
    record
        .read::<i32>(offset)
        .map(|count| count.to_string())
        .unwrap_or_else(|_| NOT_AVAILABLE.to_string())
}

/// Write the whole pulse tree as a tab-separated table, one line per trace.
///
/// Columns are the group/series/sweep/trace counters followed by the
/// exported fields of root, group, series, sweep and trace. Below
/// `max_level` only the first child of each record is visited, so e.g.
/// `max_level == 2` yields one line per series.
pub fn write_metadata_table<W: Write>(
    tree: &Tree,
    selection: &FieldSelection,
    max_level: usize,
    out: &mut W,
) -> Result<(), ReadError> {
    if max_level > Level::Trace.depth() {
        return Err(FormatError::MaxLevel(max_level).into());
    }
    if tree.kind() != TreeKind::Pulse {
        return Err(FormatError::NotPulseTree(tree.kind()).into());
    }

    let mut header: Vec<String> = COUNT_HEADERS.iter().map(|h| h.to_string()).collect();
    for table in PULSE_TABLES {
        header.extend(table_headers(table, selection));
    }
    writeln!(out, "{}", header.join("\t"))?;

    let root = tree.root();
    let root_cells = table_row(&root, FieldTable::Root, selection);
    let mut rows = 0usize;

    for group in root.children() {
        let group_cells = table_row(&group, FieldTable::Group, selection);
        for series in group.children() {
            let series_cells = table_row(&series, FieldTable::Series, selection);
            for sweep in series.children() {
                let sweep_cells = table_row(&sweep, FieldTable::Sweep, selection);
                for trace in sweep.children() {
                    let mut row = vec![
                        count_cell(&group, pulse::GR_GROUP_COUNT),
                        count_cell(&series, pulse::SE_SERIES_COUNT),
                        count_cell(&sweep, pulse::SW_SWEEP_COUNT),
                        count_cell(&trace, pulse::TR_TRACE_COUNT),
                    ];
                    row.extend_from_slice(&root_cells);
                    row.extend_from_slice(&group_cells);
                    row.extend_from_slice(&series_cells);
                    row.extend_from_slice(&sweep_cells);
                    row.extend(table_row(&trace, FieldTable::Trace, selection));
                    writeln!(out, "{}", row.join("\t"))?;
                    rows += 1;
                    if max_level < Level::Trace.depth() {
                        break;
                    }
                }
                if max_level < Level::Sweep.depth() {
                    break;
                }
            }
            if max_level < Level::Series.depth() {
                break;
            }
        }
        if max_level < Level::Group.depth() {
            break;
        }
    }

    debug!(rows, max_level, "metadata table written");
    Ok(())
}

/// [`write_metadata_table`] into a string
pub fn metadata_table(
    tree: &Tree,
    selection: &FieldSelection,
    max_level: usize,
) -> Result<String, FormatError> {
    let mut buffer = Vec::new();
    match write_metadata_table(tree, selection, max_level, &mut buffer) {
        Ok(()) => Ok(String::from_utf8_lossy(&buffer).into_owned()),
        Err(ReadError::Format(e)) => Err(e),
        // writes into a Vec cannot fail
        Err(ReadError::Io(_)) | Err(ReadError::Bounds(_)) => {
            Ok(String::from_utf8_lossy(&buffer).into_owned())
        }
    }
}
