//! Configuration file wrangling
// (c) 2024 Ross Younger

use super::{Configuration, BASE_CONFIG_FILENAME};

use figment::{
    providers::{Format, Serialized, Toml},
    value::{Dict, Map, Value},
    Figment, Metadata, Profile, Provider,
};
use serde::Deserialize;
use std::{
    fmt::{Debug, Display},
    path::{Path, PathBuf},
};
use struct_field_names_as_array::FieldNamesAsSlice;
use tabled::{settings::style::Style, Table, Tabled};

use tracing::{trace, warn};

// SOURCES ///////////////////////////////////////////////////////////////////////////////////////////////////

/// The configuration files read implicitly, lowest precedence first
fn implicit_files() -> Vec<PathBuf> {
    let mut files = vec![Path::new("/etc").join(BASE_CONFIG_FILENAME)];
    match dirs::home_dir() {
        Some(home) => files.push(home.join(format!(".{BASE_CONFIG_FILENAME}"))),
        None => warn!("no home directory; skipping user configuration file"),
    }
    files
}

/// Merges `path` if it exists. A file that exists but does not parse leaves the figment in error.
fn merge_if_present(f: Figment, path: &Path) -> Figment {
    if path.exists() {
        f.merge(Toml::file(path))
    } else {
        trace!("configuration file {} not present", path.display());
        f
    }
}

/// The compiled-in tuning defaults, as a [`figment::Provider`]
struct BuiltIn;

impl Provider for BuiltIn {
    fn metadata(&self) -> Metadata {
        Metadata::named(BUILT_IN)
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(Configuration::default()).data()
    }
}

/// Source name shown for values nobody overrode
const BUILT_IN: &str = "default";

// CONFIG MANAGER /////////////////////////////////////////////////////////////////////////////////////////////

/// Layers every configuration source into one [`Configuration`].
///
/// In increasing order of precedence: the built-in defaults, `/etc/wgtune.toml`,
/// `~/.wgtune.toml`, then whatever the caller merges (an explicit file, command-line options).
/// `wgtune --config-files` lists the implicit files.
#[derive(Debug, Default)]
pub struct Manager {
    data: Figment,
}

impl Manager {
    /// Starts from the built-in defaults and the implicit configuration files
    #[must_use]
    pub fn new() -> Self {
        let data = implicit_files()
            .iter()
            .fold(Figment::from(BuiltIn), |f, path| merge_if_present(f, path));
        Self { data }
    }

    /// Paths of the implicit configuration files, whether or not they exist
    #[must_use]
    pub fn config_files() -> Vec<String> {
        implicit_files()
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    /// Built-in defaults only
    #[cfg(test)]
    #[must_use]
    pub(crate) fn without_files() -> Self {
        Self {
            data: Figment::from(BuiltIn),
        }
    }

    /// Layers `provider` over everything merged so far
    pub fn merge_provider<T: Provider>(&mut self, provider: T) {
        self.data = std::mem::take(&mut self.data).merge(provider);
    }

    /// Layers a TOML file that must exist
    pub fn merge_toml_file<T: AsRef<Path>>(&mut self, toml: T) {
        self.merge_provider(Toml::file_exact(toml.as_ref()));
    }

    /// Extracts any deserializable view of the merged data
    pub fn get<'de, T: Deserialize<'de>>(&self) -> Result<T, figment::Error> {
        self.data.extract::<T>()
    }

    /// Extracts the [`Configuration`] and checks it is usable
    pub fn configuration(&self) -> anyhow::Result<Configuration> {
        let config: Configuration = self.get()?;
        config.validate()?;
        Ok(config)
    }
}

// PRETTY PRINT SUPPORT ///////////////////////////////////////////////////////////////////////////////////////

/// One row of the `--show-config` table
#[derive(Tabled)]
struct ConfigRow {
    field: &'static str,
    value: String,
    source: String,
}

fn describe_source(meta: Option<&Metadata>) -> String {
    meta.map(|m| {
        m.source
            .as_ref()
            .map_or_else(|| m.name.to_string(), figment::Source::to_string)
    })
    .unwrap_or_default()
}

/// Renders a scalar value. Floats keep their natural precision.
fn describe_value(value: &Value) -> String {
    match value {
        Value::String(_, s) => s.clone(),
        Value::Char(_, c) => c.to_string(),
        Value::Bool(_, b) => b.to_string(),
        Value::Num(_, num) => num
            .to_i128()
            .map(|i| i.to_string())
            .or_else(|| num.to_u128().map(|u| u.to_string()))
            .or_else(|| num.to_f64().map(|v| v.to_string()))
            .unwrap_or_else(|| "<number>".into()),
        Value::Empty(..) => "<empty>".into(),
        // Configuration is flat
        Value::Dict(..) | Value::Array(..) => "<unsupported>".into(),
    }
}

/// Pretty-printing type wrapper to Manager.
///
/// Known fields are listed in declaration order, so related options stay together.
#[derive(Debug)]
pub struct DisplayAdapter<'a> {
    /// Data source
    source: &'a Manager,
    /// Whether to warn if unused fields are present
    warn_on_unused: bool,
    /// The fields we want to output, in order
    fields: &'static [&'static str],
}

impl Manager {
    /// Creates a `DisplayAdapter` for this struct with the given options.
    ///
    /// # Returns
    /// An ephemeral structure implementing `Display`.
    #[must_use]
    pub fn to_display_adapter<'de, T>(&self, warn_on_unused: bool) -> DisplayAdapter<'_>
    where
        T: Deserialize<'de> + FieldNamesAsSlice,
    {
        DisplayAdapter {
            source: self,
            warn_on_unused,
            fields: T::FIELD_NAMES_AS_SLICE,
        }
    }
}

impl DisplayAdapter<'_> {
    fn rows(&self) -> Vec<ConfigRow> {
        self.fields
            .iter()
            .filter_map(|&field| {
                let value = self.source.data.find_value(field).ok()?;
                Some(ConfigRow {
                    field,
                    value: describe_value(&value),
                    source: describe_source(self.source.data.find_metadata(field)),
                })
            })
            .collect()
    }

    /// Keys present in the data that the target struct does not know about
    fn unrecognised(&self) -> Vec<String> {
        let Ok(data) = self.source.data.data() else {
            return Vec::new();
        };
        data.get(&figment::Profile::Default)
            .map(|dict| {
                dict.keys()
                    .filter(|k| !self.fields.iter().any(|f| *f == k.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Display for DisplayAdapter<'_> {
    /// Formats the known fields as a table, with the source of each value.
    ///
    /// N.B. This function uses CLI styling.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::cli::styles::{ERROR_S, WARNING_S};
        use anstream::eprintln;
        use owo_colors::OwoColorize as _;

        if let Err(e) = self.source.data.data() {
            // No metadata here; extracting a struct gives a better message
            eprintln!("{} {e}", "ERROR".style(ERROR_S));
            return Ok(());
        }
        if self.warn_on_unused {
            for field in self.unrecognised() {
                let source = describe_source(self.source.data.find_metadata(&field));
                eprintln!(
                    "{}: unrecognised field `{field}` in {source}",
                    "WARNING".style(WARNING_S)
                );
            }
        }
        write!(f, "{}", Table::new(self.rows()).with(Style::sharp()))
    }
}
