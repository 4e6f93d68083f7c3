//! Error types for blob validation and snapshot file I/O.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Structural or compatibility problems with a snapshot blob.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Fewer bytes than the fixed header.
    #[error("snapshot blob is truncated ({len} bytes)")]
    Truncated {
        /// Length that was supplied.
        len: usize,
    },
    /// The leading magic bytes do not identify a snapshot.
    #[error("snapshot blob has an invalid magic number")]
    BadMagic,
    /// The header names a format this host cannot read.
    #[error("snapshot blob format version {found} is not supported (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the header.
        found: u32,
        /// Version this host writes.
        expected: u32,
    },
    /// Declared section lengths disagree with the blob size.
    #[error("snapshot blob declares {declared} bytes of sections but carries {actual}")]
    LengthMismatch {
        /// Metadata plus payload length from the header.
        declared: u64,
        /// Bytes actually present after the header.
        actual: u64,
    },
    /// The stored checksum does not match the contents.
    #[error("snapshot blob checksum mismatch")]
    ChecksumMismatch,
    /// The metadata section is not valid JSON metadata.
    #[error("snapshot metadata is malformed")]
    Metadata {
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
    /// The blob was produced for a different host.
    #[error("snapshot was built for {field} {found:?} but this host is {expected:?}")]
    Incompatible {
        /// Metadata field that differs.
        field: &'static str,
        /// Value recorded in the blob.
        found: String,
        /// Value of the running host.
        expected: String,
    },
}

/// Failures reading or writing snapshot files.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The blob file could not be read.
    #[error("Cannot open {path} for reading a snapshot: {source}")]
    Read {
        /// File that was requested.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The blob file could not be created or written.
    #[error("Cannot open {path} for writing a snapshot.")]
    Write {
        /// Destination path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The blob was read but failed validation.
    #[error("{origin}: {source}")]
    Invalid {
        /// Where the blob came from.
        origin: String,
        /// Validation failure.
        #[source]
        source: BlobError,
    },
}
