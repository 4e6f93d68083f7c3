//! Loaded snapshot blobs: owned or borrowed bytes, validated once, with
//! accessors for the metadata and engine state sections.

use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::ops::Range;

use camino::Utf8Path;

use crate::blob::{FLAG_PREDICTABLE, encode_blob, validate};
use crate::error::{BlobError, SnapshotError};
use crate::metadata::SnapshotMetadata;

/// Who owns the bytes behind a [`SnapshotData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Linked into the binary and shared for the life of the process.
    Embedded,
    /// Read from a file or freshly built; released when dropped.
    Dynamic,
}

/// A validated snapshot blob.
///
/// Construction always runs the structural checks, so a `SnapshotData` that
/// exists is known to be intact. Compatibility with the running host is a
/// separate check, see [`SnapshotData::check_compatible`].
#[derive(Debug, Clone)]
pub struct SnapshotData {
    bytes: Cow<'static, [u8]>,
    flags: u32,
    metadata: SnapshotMetadata,
    payload: Range<usize>,
}

impl SnapshotData {
    /// Wraps a blob that lives in the binary image.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError`] if the blob fails structural validation.
    pub fn from_static(bytes: &'static [u8]) -> Result<Self, BlobError> {
        Self::from_cow(Cow::Borrowed(bytes))
    }

    /// Takes ownership of blob bytes read from elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError`] if the blob fails structural validation.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BlobError> {
        Self::from_cow(Cow::Owned(bytes))
    }

    fn from_cow(bytes: Cow<'static, [u8]>) -> Result<Self, BlobError> {
        let validated = validate(&bytes)?;
        Ok(Self {
            flags: validated.header.flags,
            metadata: validated.metadata,
            payload: validated.payload,
            bytes,
        })
    }

    /// Reads and validates a blob file in one pass.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Read`] when the file cannot be read and
    /// [`SnapshotError::Invalid`] when its contents fail validation.
    pub fn from_file(path: &Utf8Path) -> Result<Self, SnapshotError> {
        let bytes = fs::read(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(bytes).map_err(|source| SnapshotError::Invalid {
            origin: path.to_string(),
            source,
        })
    }

    /// Builds a new dynamic snapshot around an engine payload.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError`] if the metadata cannot be encoded.
    pub fn new(
        metadata: &SnapshotMetadata,
        predictable: bool,
        payload: &[u8],
    ) -> Result<Self, BlobError> {
        let flags = if predictable { FLAG_PREDICTABLE } else { 0 };
        Self::from_bytes(encode_blob(metadata, flags, payload)?)
    }

    /// Ownership mode of the underlying bytes.
    #[must_use]
    pub const fn ownership(&self) -> Ownership {
        match self.bytes {
            Cow::Borrowed(_) => Ownership::Embedded,
            Cow::Owned(_) => Ownership::Dynamic,
        }
    }

    /// Metadata recorded when the blob was written.
    #[must_use]
    pub const fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    /// Raw header flags.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Returns `true` if the blob came from a predictable build.
    #[must_use]
    pub const fn is_predictable(&self) -> bool {
        self.flags & FLAG_PREDICTABLE != 0
    }

    /// The engine payload section.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.bytes.get(self.payload.clone()).unwrap_or_default()
    }

    /// The complete blob, header included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Checks that the blob was produced for `host`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Incompatible`] on the first differing field.
    pub fn check_compatible(&self, host: &SnapshotMetadata) -> Result<(), BlobError> {
        self.metadata.check_compatible(host)
    }

    /// Writes the complete blob to `writer` in one call.
    ///
    /// # Errors
    ///
    /// Propagates the writer's I/O error.
    pub fn write_to(&self, mut writer: impl Write) -> std::io::Result<()> {
        writer.write_all(&self.bytes)?;
        writer.flush()
    }

    /// Writes the blob to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Write`] if the file cannot be created or
    /// written.
    pub fn to_file(&self, path: &Utf8Path) -> Result<(), SnapshotError> {
        let write = || -> std::io::Result<()> {
            let file = fs::File::create(path)?;
            self.write_to(std::io::BufWriter::new(file))
        };
        write().map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn metadata() -> SnapshotMetadata {
        SnapshotMetadata::for_host("0.1.0", "test-engine")
    }

    fn built(metadata: &SnapshotMetadata, payload: &[u8]) -> SnapshotData {
        match SnapshotData::new(metadata, false, payload) {
            Ok(data) => data,
            Err(error) => panic!("build failed: {error}"),
        }
    }

    #[rstest]
    fn built_snapshots_are_dynamic(metadata: SnapshotMetadata) {
        let data = built(&metadata, b"{}");
        assert_eq!(data.ownership(), Ownership::Dynamic);
        assert!(!data.is_predictable());
        assert_eq!(data.payload(), b"{}");
    }

    #[rstest]
    fn static_blobs_are_embedded(metadata: SnapshotMetadata) {
        let bytes: &'static [u8] = Vec::leak(built(&metadata, b"{}").as_bytes().to_vec());
        let data = match SnapshotData::from_static(bytes) {
            Ok(data) => data,
            Err(error) => panic!("static blob rejected: {error}"),
        };
        assert_eq!(data.ownership(), Ownership::Embedded);
        assert_eq!(data.metadata(), &metadata);
    }

    #[rstest]
    fn file_round_trip_preserves_payload(metadata: SnapshotMetadata) {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let path = match Utf8PathBuf::from_path_buf(dir.path().join("snapshot.blob")) {
            Ok(path) => path,
            Err(path) => panic!("non UTF-8 path: {}", path.display()),
        };
        let original = built(&metadata, b"{\"X\":1}");
        if let Err(error) = original.to_file(&path) {
            panic!("write failed: {error}");
        }
        let loaded = match SnapshotData::from_file(&path) {
            Ok(data) => data,
            Err(error) => panic!("read failed: {error}"),
        };
        assert_eq!(loaded.payload(), original.payload());
        assert_eq!(loaded.as_bytes(), original.as_bytes());
    }

    #[rstest]
    fn missing_file_is_a_read_error() {
        let result = SnapshotData::from_file(Utf8Path::new("/nonexistent/snapshot.blob"));
        assert!(matches!(result, Err(SnapshotError::Read { .. })));
    }

    #[rstest]
    fn unwritable_destination_is_a_write_error(metadata: SnapshotMetadata) {
        let data = built(&metadata, b"{}");
        let error = match data.to_file(Utf8Path::new("/nonexistent/dir/out.blob")) {
            Err(error) => error,
            Ok(()) => panic!("write to missing directory succeeded"),
        };
        assert_eq!(
            error.to_string(),
            "Cannot open /nonexistent/dir/out.blob for writing a snapshot."
        );
    }
}
