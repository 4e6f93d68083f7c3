//! Persistent snapshot formats for the kindle host.
//!
//! A snapshot blob is a fixed 64-byte header followed by JSON metadata and an
//! opaque engine payload. The header carries a SHA-256 checksum over
//! everything after it, so truncation and corruption are caught before any
//! section is interpreted. [`SnapshotData`] owns a validated blob, either
//! borrowed from the binary image or held on the heap. [`PackagedResource`]
//! reads the optional trailer a single-file application appends to the host
//! executable.

mod blob;
mod config;
mod data;
mod error;
mod metadata;
mod package;

pub use blob::{BlobHeader, FLAG_PREDICTABLE, FORMAT_VERSION, HEADER_LEN, MAGIC, encode_blob};
pub use config::{EMBEDDED_BUILDER, SnapshotConfig, SnapshotConfigError};
pub use data::{Ownership, SnapshotData};
pub use error::{BlobError, SnapshotError};
pub use metadata::SnapshotMetadata;
pub use package::{
    PACKAGE_FOOTER_LEN, PACKAGE_MAGIC, PackageError, PackageKind, PackagedResource,
};
