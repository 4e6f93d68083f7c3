//! Encoding and structural validation of snapshot blobs.
//!
//! Layout, all integers little-endian:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 8 | magic |
//! | 8 | 4 | format version |
//! | 12 | 4 | flags |
//! | 16 | 8 | metadata length |
//! | 24 | 8 | payload length |
//! | 32 | 32 | SHA-256 of everything after the header |
//! | 64 | M | JSON metadata |
//! | 64 + M | P | engine payload |

use std::ops::Range;

use sha2::{Digest, Sha256};

use crate::error::BlobError;
use crate::metadata::SnapshotMetadata;

/// Leading bytes of every snapshot blob.
pub const MAGIC: [u8; 8] = *b"KNDLSNAP";

/// Format version written by this host.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the fixed header.
pub const HEADER_LEN: usize = 64;

/// Flag bit set on blobs produced by a predictable build.
pub const FLAG_PREDICTABLE: u32 = 1;

const CHECKSUM_OFFSET: usize = 32;

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    /// Format version.
    pub version: u32,
    /// Flag bits.
    pub flags: u32,
    /// Length of the metadata section.
    pub metadata_len: u64,
    /// Length of the payload section.
    pub payload_len: u64,
    /// Stored SHA-256 checksum.
    pub checksum: [u8; 32],
}

/// A structurally valid blob.
#[derive(Debug)]
pub(crate) struct ValidatedBlob {
    pub(crate) header: BlobHeader,
    pub(crate) metadata: SnapshotMetadata,
    pub(crate) payload: Range<usize>,
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], BlobError> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or(BlobError::Truncated { len: bytes.len() })
}

fn to_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// Serialises a blob from its parts.
///
/// # Errors
///
/// Returns [`BlobError::Metadata`] if the metadata cannot be encoded.
pub fn encode_blob(
    metadata: &SnapshotMetadata,
    flags: u32,
    payload: &[u8],
) -> Result<Vec<u8>, BlobError> {
    let metadata_bytes =
        serde_json::to_vec(metadata).map_err(|source| BlobError::Metadata { source })?;
    let mut blob = Vec::with_capacity(HEADER_LEN + metadata_bytes.len() + payload.len());
    blob.extend_from_slice(&MAGIC);
    blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    blob.extend_from_slice(&flags.to_le_bytes());
    blob.extend_from_slice(&to_u64(metadata_bytes.len()).to_le_bytes());
    blob.extend_from_slice(&to_u64(payload.len()).to_le_bytes());
    blob.resize(HEADER_LEN, 0);
    blob.extend_from_slice(&metadata_bytes);
    blob.extend_from_slice(payload);

    let checksum = Sha256::digest(blob.get(HEADER_LEN..).unwrap_or_default());
    if let Some(slot) = blob.get_mut(CHECKSUM_OFFSET..HEADER_LEN) {
        slot.copy_from_slice(&checksum);
    }
    Ok(blob)
}

/// Parses the fixed header without checking the sections.
///
/// # Errors
///
/// Returns [`BlobError::Truncated`] or [`BlobError::BadMagic`].
pub(crate) fn read_header(bytes: &[u8]) -> Result<BlobHeader, BlobError> {
    if bytes.len() < HEADER_LEN {
        return Err(BlobError::Truncated { len: bytes.len() });
    }
    if read_array::<8>(bytes, 0)? != MAGIC {
        return Err(BlobError::BadMagic);
    }
    Ok(BlobHeader {
        version: u32::from_le_bytes(read_array(bytes, 8)?),
        flags: u32::from_le_bytes(read_array(bytes, 12)?),
        metadata_len: u64::from_le_bytes(read_array(bytes, 16)?),
        payload_len: u64::from_le_bytes(read_array(bytes, 24)?),
        checksum: read_array(bytes, CHECKSUM_OFFSET)?,
    })
}

/// Runs every structural check in order: size, magic, version, lengths and
/// checksum. Metadata is decoded only once all of them pass.
pub(crate) fn validate(bytes: &[u8]) -> Result<ValidatedBlob, BlobError> {
    let header = read_header(bytes)?;
    if header.version != FORMAT_VERSION {
        return Err(BlobError::UnsupportedVersion {
            found: header.version,
            expected: FORMAT_VERSION,
        });
    }

    let body = bytes.get(HEADER_LEN..).unwrap_or_default();
    let actual = to_u64(body.len());
    let declared = header.metadata_len.checked_add(header.payload_len);
    if declared != Some(actual) {
        return Err(BlobError::LengthMismatch {
            declared: declared.unwrap_or(u64::MAX),
            actual,
        });
    }

    if Sha256::digest(body).as_slice() != header.checksum {
        return Err(BlobError::ChecksumMismatch);
    }

    // Both lengths fit in `body.len()`, so these conversions cannot fail.
    let metadata_len = usize::try_from(header.metadata_len).unwrap_or(usize::MAX);
    let metadata_end = HEADER_LEN.saturating_add(metadata_len);
    let metadata_bytes = bytes
        .get(HEADER_LEN..metadata_end)
        .ok_or(BlobError::Truncated { len: bytes.len() })?;
    let metadata = serde_json::from_slice(metadata_bytes)
        .map_err(|source| BlobError::Metadata { source })?;

    Ok(ValidatedBlob {
        header,
        metadata,
        payload: metadata_end..bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn metadata() -> SnapshotMetadata {
        SnapshotMetadata::for_host("0.1.0", "test-engine")
    }

    fn encoded(metadata: &SnapshotMetadata, payload: &[u8]) -> Vec<u8> {
        match encode_blob(metadata, FLAG_PREDICTABLE, payload) {
            Ok(blob) => blob,
            Err(error) => panic!("encode failed: {error}"),
        }
    }

    #[rstest]
    fn header_fields_are_little_endian(metadata: SnapshotMetadata) {
        let blob = encoded(&metadata, b"payload");
        assert_eq!(blob.get(..8), Some(MAGIC.as_slice()));
        assert_eq!(blob.get(8..12), Some([1_u8, 0, 0, 0].as_slice()));
        assert_eq!(blob.get(12..16), Some([1_u8, 0, 0, 0].as_slice()));
        assert_eq!(blob.get(24..32), Some(7_u64.to_le_bytes().as_slice()));
    }

    #[rstest]
    fn validated_payload_matches_input(metadata: SnapshotMetadata) {
        let blob = encoded(&metadata, b"payload");
        let validated = match validate(&blob) {
            Ok(validated) => validated,
            Err(error) => panic!("validation failed: {error}"),
        };
        assert_eq!(blob.get(validated.payload), Some(b"payload".as_slice()));
        assert_eq!(validated.metadata, metadata);
        assert_eq!(validated.header.flags, FLAG_PREDICTABLE);
    }

    #[rstest]
    fn short_input_is_truncated() {
        assert!(matches!(
            validate(&[0_u8; 10]),
            Err(BlobError::Truncated { len: 10 })
        ));
    }

    #[rstest]
    fn wrong_magic_is_rejected(metadata: SnapshotMetadata) {
        let mut blob = encoded(&metadata, b"x");
        if let Some(byte) = blob.first_mut() {
            *byte = b'X';
        }
        assert!(matches!(validate(&blob), Err(BlobError::BadMagic)));
    }

    #[rstest]
    fn future_version_is_rejected(metadata: SnapshotMetadata) {
        let mut blob = encoded(&metadata, b"x");
        if let Some(byte) = blob.get_mut(8) {
            *byte = 2;
        }
        assert!(matches!(
            validate(&blob),
            Err(BlobError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[rstest]
    fn dropped_tail_is_a_length_mismatch(metadata: SnapshotMetadata) {
        let mut blob = encoded(&metadata, b"payload");
        blob.pop();
        assert!(matches!(
            validate(&blob),
            Err(BlobError::LengthMismatch { .. })
        ));
    }

    #[rstest]
    #[case::checksum_byte(CHECKSUM_OFFSET)]
    #[case::payload_byte(usize::MAX)]
    fn flipped_bytes_fail_the_checksum(metadata: SnapshotMetadata, #[case] offset: usize) {
        let mut blob = encoded(&metadata, b"payload");
        let index = if offset == usize::MAX { blob.len() - 1 } else { offset };
        if let Some(byte) = blob.get_mut(index) {
            *byte ^= 0xff;
        }
        assert!(matches!(validate(&blob), Err(BlobError::ChecksumMismatch)));
    }
}
