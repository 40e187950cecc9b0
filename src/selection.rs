// SPDX-License-Identifier: MIT
//! User settings: field selection and trace naming
//!
//! The descriptor tables are immutable; which fields are exported or printed
//! is decided by a [`FieldSelection`] passed explicitly to the export helpers.
//! Settings load from TOML:
//!
//! ```toml
//! [naming]
//! imon = "Imon"
//! vmon = "Vmon"
//! leak = "Leak"
//!
//! [fields.trace]
//! export = ["Rs", "Cslow", "Holding"]
//! print = ["Recording Mode"]
//! ```
//!
//! A list given for a table replaces that table's defaults; omitted lists
//! keep them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fields::FieldDescriptor;
use crate::tables::FieldTable;

/// Environment variable naming a settings file for [`Settings::from_env`]
pub const SETTINGS_ENV: &str = "PMDAT_SETTINGS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown field table {0:?}")]
    UnknownTable(String),

    #[error("unknown field {name:?} in table {table}")]
    UnknownField { table: &'static str, name: String },

    #[error("{0}")]
    Invalid(String),
}

/// Labels for traces whose own label does not identify them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceNaming {
    /// Current monitor traces
    pub imon: String,
    /// Voltage monitor traces
    pub vmon: String,
    /// Unlabelled leak traces
    pub leak: String,
}

impl Default for TraceNaming {
    fn default() -> Self {
        Self {
            imon: "Imon".to_string(),
            vmon: "Vmon".to_string(),
            leak: "Leak".to_string(),
        }
    }
}

/// Per-table replacement lists of field names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableOverrides {
    pub export: Option<Vec<String>>,
    pub print: Option<Vec<String>>,
}

/// Settings document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub naming: TraceNaming,
    /// Keyed by table name (`trace`, `amplifier_state`, ...)
    pub fields: BTreeMap<String, TableOverrides>,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading settings");
        Self::from_toml_str(&text)
    }

    /// Load the file named by `PMDAT_SETTINGS`, or defaults if it is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(SETTINGS_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let labels = [
            ("naming.imon", &self.naming.imon),
            ("naming.vmon", &self.naming.vmon),
            ("naming.leak", &self.naming.leak),
        ];
        for (key, label) in labels {
            if label.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} cannot be empty", key)));
            }
        }

        for (key, overrides) in &self.fields {
            let table = table_named(key)?;
            let lists = overrides.export.iter().chain(overrides.print.iter());
            for name in lists.flatten() {
                if table.position(name).is_none() {
                    return Err(ConfigError::UnknownField {
                        table: table.name(),
                        name: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// The field selection these settings describe
    pub fn selection(&self) -> Result<FieldSelection, ConfigError> {
        let mut selection = FieldSelection::default();
        for (key, overrides) in &self.fields {
            let table = table_named(key)?;
            if let Some(names) = &overrides.export {
                selection.replace(table, names, |flags, on| flags.export = on)?;
            }
            if let Some(names) = &overrides.print {
                selection.replace(table, names, |flags, on| flags.print = on)?;
            }
        }
        Ok(selection)
    }
}

fn table_named(key: &str) -> Result<FieldTable, ConfigError> {
    FieldTable::from_name(key).ok_or_else(|| ConfigError::UnknownTable(key.to_string()))
}

/// Inclusion flags of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub export: bool,
    pub print: bool,
}

/// Export/print choice for every field of every table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelection {
    flags: BTreeMap<FieldTable, Vec<Flags>>,
}

impl Default for FieldSelection {
    /// The flags declared in the descriptor tables
    fn default() -> Self {
        let flags = FieldTable::ALL
            .iter()
            .map(|&table| {
                let flags = table
                    .fields()
                    .iter()
                    .map(|f| Flags {
                        export: f.export,
                        print: f.print,
                    })
                    .collect();
                (table, flags)
            })
            .collect();
        Self { flags }
    }
}

impl FieldSelection {
    /// Nothing exported or printed
    pub fn none() -> Self {
        let mut selection = Self::default();
        for flags in selection.flags.values_mut() {
            flags.fill(Flags::default());
        }
        selection
    }

    pub fn flags(&self, table: FieldTable, index: usize) -> Flags {
        self.flags
            .get(&table)
            .and_then(|flags| flags.get(index))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_exported(&self, table: FieldTable, index: usize) -> bool {
        self.flags(table, index).export
    }

    pub fn is_printed(&self, table: FieldTable, index: usize) -> bool {
        self.flags(table, index).print
    }

    pub fn set_export(&mut self, table: FieldTable, name: &str, on: bool) -> Result<(), ConfigError> {
        self.flags_mut(table, name)?.export = on;
        Ok(())
    }

    pub fn set_print(&mut self, table: FieldTable, name: &str, on: bool) -> Result<(), ConfigError> {
        self.flags_mut(table, name)?.print = on;
        Ok(())
    }

    /// Fields of `table` selected for export, in table order
    pub fn exported(&self, table: FieldTable) -> impl Iterator<Item = &'static FieldDescriptor> + '_ {
        table
            .fields()
            .iter()
            .enumerate()
            .filter(move |&(i, _)| self.is_exported(table, i))
            .map(|(_, f)| f)
    }

    /// Fields of `table` selected for printing, in table order
    pub fn printed(&self, table: FieldTable) -> impl Iterator<Item = &'static FieldDescriptor> + '_ {
        table
            .fields()
            .iter()
            .enumerate()
            .filter(move |&(i, _)| self.is_printed(table, i))
            .map(|(_, f)| f)
    }

    fn flags_mut(&mut self, table: FieldTable, name: &str) -> Result<&mut Flags, ConfigError> {
        let unknown = || ConfigError::UnknownField {
            table: table.name(),
            name: name.to_string(),
        };
        let index = table.position(name).ok_or_else(unknown)?;
        self.flags
            .get_mut(&table)
            .and_then(|flags| flags.get_mut(index))
            .ok_or_else(unknown)
    }

    fn replace(
        &mut self,
        table: FieldTable,
        names: &[String],
        set: impl Fn(&mut Flags, bool),
    ) -> Result<(), ConfigError> {
        if let Some(flags) = self.flags.get_mut(&table) {
            for f in flags.iter_mut() {
                set(f, false);
            }
        }
        for name in names {
            set(self.flags_mut(table, name)?, true);
        }
        Ok(())
    }
}
