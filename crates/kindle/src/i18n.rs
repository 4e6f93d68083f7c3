//! ICU data directory resolution.

use std::fs::File;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use kindle_config::ICU_DATA_FILE;

/// The configured ICU directory lacks readable data.
#[derive(Debug, Error)]
#[error(
    "could not initialize ICU: check that the directory {dir} given by KINDLE_ICU_DATA or --icu-data-dir contains a readable kindle-icu.dat"
)]
pub struct IcuError {
    /// Directory that was checked.
    pub dir: Utf8PathBuf,
    /// Failure opening the data file.
    #[source]
    pub source: io::Error,
}

/// Where ICU data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcuData {
    /// A directory containing the full data file.
    Directory(Utf8PathBuf),
    /// No directory; the engine's built-in minimal data is used.
    Minimal,
}

fn has_data(dir: &Utf8Path) -> io::Result<()> {
    File::open(dir.join(ICU_DATA_FILE)).map(drop)
}

/// Picks the ICU directory: the option first, then the environment, then the
/// build-time default if its data file is readable.
///
/// # Errors
///
/// Returns [`IcuError`] when an explicitly configured directory has no
/// readable data file.
pub fn resolve(
    option: Option<&Utf8Path>,
    environment: Option<&Utf8Path>,
    build_default: Option<&str>,
) -> Result<IcuData, IcuError> {
    if let Some(dir) = option.or(environment) {
        return has_data(dir)
            .map(|()| IcuData::Directory(dir.to_path_buf()))
            .map_err(|source| IcuError {
                dir: dir.to_path_buf(),
                source,
            });
    }
    let fallback = build_default
        .map(Utf8Path::new)
        .filter(|dir| has_data(dir).is_ok())
        .map_or(IcuData::Minimal, |dir| IcuData::Directory(dir.to_path_buf()));
    Ok(fallback)
}
