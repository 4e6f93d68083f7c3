//! The `--build-snapshot-config` JSON file.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

/// Builder name that exports the embedded snapshot instead of running a
/// script.
pub const EMBEDDED_BUILDER: &str = "kindle:embedded_snapshot_main";

/// Failure reading a `--build-snapshot-config` file.
#[derive(Debug, Error)]
pub enum SnapshotConfigError {
    /// The file could not be read.
    #[error("Cannot read snapshot configuration from {path}: {source}")]
    Read {
        /// Requested path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The file is not a valid configuration.
    #[error("Cannot parse snapshot configuration from {path}: {source}")]
    Parse {
        /// Requested path.
        path: Utf8PathBuf,
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Build-mode descriptor read from JSON.
///
/// ```json
/// { "builder": "build.ks", "args": ["--fast"], "withoutCodeCache": false }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SnapshotConfig {
    /// Script whose resulting state is captured.
    pub builder: Utf8PathBuf,
    /// Extra arguments placed after the builder script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Skip compiled-code caching in the produced snapshot.
    #[serde(default)]
    pub without_code_cache: bool,
}

impl SnapshotConfig {
    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotConfigError`] when the file is unreadable or invalid.
    pub fn from_file(path: &Utf8Path) -> Result<Self, SnapshotConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| SnapshotConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| SnapshotConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Configuration equivalent to passing `builder` on the command line.
    #[must_use]
    pub fn for_script(builder: &Utf8Path) -> Self {
        Self {
            builder: builder.to_path_buf(),
            args: Vec::new(),
            without_code_cache: false,
        }
    }

    /// Returns `true` if the builder asks for the embedded snapshot.
    #[must_use]
    pub fn uses_embedded_builder(&self) -> bool {
        self.builder.as_str() == EMBEDDED_BUILDER
    }
}
