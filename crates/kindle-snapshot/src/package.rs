//! Single-file application trailer.
//!
//! A packaged executable ends with `payload`, a one-byte kind, the payload
//! length as a little-endian `u64`, and [`PACKAGE_MAGIC`]. Only the footer
//! and the payload are read; the rest of the executable is never touched.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::data::SnapshotData;
use crate::error::BlobError;

/// Trailing magic of a packaged executable.
pub const PACKAGE_MAGIC: [u8; 8] = *b"KNDLPKG\x01";

/// Kind byte, length and magic.
pub const PACKAGE_FOOTER_LEN: u64 = 17;

/// What a packaged executable carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// A snapshot blob.
    Snapshot,
    /// Script source run as the entry point.
    Script,
}

impl PackageKind {
    const fn tag(self) -> u8 {
        match self {
            Self::Snapshot => 1,
            Self::Script => 2,
        }
    }

    const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Snapshot),
            2 => Some(Self::Script),
            _ => None,
        }
    }
}

/// Problems with a package trailer.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The executable could not be read.
    #[error("cannot read packaged application {path}: {source}")]
    Io {
        /// Executable path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The kind byte is not recognised.
    #[error("packaged application {path} has unknown resource kind {tag}")]
    UnknownKind {
        /// Executable path.
        path: Utf8PathBuf,
        /// Kind byte found.
        tag: u8,
    },
    /// The declared length runs past the start of the file.
    #[error("packaged application {path} declares {declared} payload bytes but the file is {file_len} bytes")]
    BadLength {
        /// Executable path.
        path: Utf8PathBuf,
        /// Declared payload length.
        declared: u64,
        /// Total file length.
        file_len: u64,
    },
    /// A script payload is not UTF-8.
    #[error("packaged application {path} carries a script that is not UTF-8")]
    ScriptEncoding {
        /// Executable path.
        path: Utf8PathBuf,
    },
    /// A snapshot payload failed validation.
    #[error("packaged application {path}: {source}")]
    Snapshot {
        /// Executable path.
        path: Utf8PathBuf,
        /// Validation failure.
        #[source]
        source: BlobError,
    },
}

/// Resource carried by a packaged executable.
#[derive(Debug, Clone)]
pub enum PackagedResource {
    /// A validated snapshot.
    Snapshot(SnapshotData),
    /// Entry script source.
    Script(String),
}

impl PackagedResource {
    /// Inspects `path` for a package trailer.
    ///
    /// Returns `Ok(None)` for an ordinary executable.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError`] when a trailer is present but malformed.
    pub fn from_executable(path: &Utf8Path) -> Result<Option<Self>, PackageError> {
        let io_error = |source| PackageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_error)?;
        Self::from_reader(&mut file, path)
    }

    /// Inspects a seekable reader for a package trailer. `path` is used for
    /// error messages only.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError`] when a trailer is present but malformed.
    pub fn from_reader<R: Read + Seek>(
        reader: &mut R,
        path: &Utf8Path,
    ) -> Result<Option<Self>, PackageError> {
        let io_error = |source| PackageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file_len = reader.seek(SeekFrom::End(0)).map_err(io_error)?;
        if file_len < PACKAGE_FOOTER_LEN {
            return Ok(None);
        }
        let mut footer = [0_u8; 17];
        reader
            .seek(SeekFrom::Start(file_len - PACKAGE_FOOTER_LEN))
            .map_err(io_error)?;
        reader.read_exact(&mut footer).map_err(io_error)?;

        let [tag, l0, l1, l2, l3, l4, l5, l6, l7, magic @ ..] = footer;
        if magic != PACKAGE_MAGIC {
            return Ok(None);
        }
        let kind = PackageKind::from_tag(tag).ok_or_else(|| PackageError::UnknownKind {
            path: path.to_path_buf(),
            tag,
        })?;
        let declared = u64::from_le_bytes([l0, l1, l2, l3, l4, l5, l6, l7]);
        let bad_length = || PackageError::BadLength {
            path: path.to_path_buf(),
            declared,
            file_len,
        };
        let start = (file_len - PACKAGE_FOOTER_LEN)
            .checked_sub(declared)
            .ok_or_else(bad_length)?;
        let len = usize::try_from(declared).map_err(|_| bad_length())?;

        let mut payload = vec![0_u8; len];
        reader.seek(SeekFrom::Start(start)).map_err(io_error)?;
        reader.read_exact(&mut payload).map_err(io_error)?;

        match kind {
            PackageKind::Snapshot => SnapshotData::from_bytes(payload)
                .map(|data| Some(Self::Snapshot(data)))
                .map_err(|source| PackageError::Snapshot {
                    path: path.to_path_buf(),
                    source,
                }),
            PackageKind::Script => String::from_utf8(payload)
                .map(|source| Some(Self::Script(source)))
                .map_err(|_| PackageError::ScriptEncoding {
                    path: path.to_path_buf(),
                }),
        }
    }

    /// Appends `payload` and a trailer of the given kind to `writer`.
    ///
    /// # Errors
    ///
    /// Propagates the writer's I/O error.
    pub fn append_to(mut writer: impl Write, kind: PackageKind, payload: &[u8]) -> io::Result<()> {
        let len = u64::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
        writer.write_all(payload)?;
        writer.write_all(&[kind.tag()])?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&PACKAGE_MAGIC)?;
        writer.flush()
    }

    /// The kind of resource carried.
    #[must_use]
    pub const fn kind(&self) -> PackageKind {
        match self {
            Self::Snapshot(_) => PackageKind::Snapshot,
            Self::Script(_) => PackageKind::Script,
        }
    }
}
