//! Named SQL command catalog for the Hearth service.
//!
//! The catalog is a flat key → SQL-text mapping loaded once at startup from a
//! TOML resource and never mutated afterwards. The executor looks commands up
//! by key; a missing key is the caller's problem, a missing or unreadable
//! resource is fatal to startup — there is no such thing as a usable partial
//! catalog.

use std::collections::BTreeMap;
use std::fs;
use thiserror::Error;

/// Errors that can occur when loading the command catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The command resource could not be read.
    #[error("failed to read command file '{path}': {source}")]
    Read {
        /// Path of the resource that failed to load.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The command resource could not be parsed as a flat string mapping.
    #[error("failed to parse command file '{path}': {source}")]
    Parse {
        /// Path of the resource that failed to parse.
        path: String,
        /// The underlying TOML error.
        source: toml::de::Error,
    },

    /// The command resource parsed but contained no commands.
    #[error("command file '{path}' contains no commands")]
    Empty {
        /// Path of the empty resource.
        path: String,
    },
}

/// An immutable mapping of command names to SQL text.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    commands: BTreeMap<String, String>,
}

impl Catalog {
    /// Loads the catalog from a TOML file of `"key" = "sql text"` pairs.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the file cannot be read, cannot be parsed,
    /// or parses to an empty mapping.
    pub fn load(path: &str) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_string(),
            source,
        })?;
        let catalog = Self::parse(&text, path)?;
        tracing::info!(path, commands = catalog.len(), "loaded command catalog");
        Ok(catalog)
    }

    /// Parses catalog text directly. `origin` is used only in error messages.
    pub fn parse(text: &str, origin: &str) -> Result<Self, CatalogError> {
        let commands: BTreeMap<String, String> =
            toml::from_str(text).map_err(|source| CatalogError::Parse {
                path: origin.to_string(),
                source,
            })?;

        if commands.is_empty() {
            return Err(CatalogError::Empty {
                path: origin.to_string(),
            });
        }

        Ok(Self { commands })
    }

    /// Returns the SQL text stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.commands.get(key).map(String::as_str)
    }

    /// Number of commands in the catalog.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the catalog holds no commands. Never true for a loaded catalog.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
