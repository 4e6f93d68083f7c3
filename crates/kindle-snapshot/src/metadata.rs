//! Host identity stamped into every blob and checked on load.

use serde::{Deserialize, Serialize};

use crate::error::BlobError;

/// Identity of the host that produced a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotMetadata {
    /// Host version that wrote the blob.
    pub host_version: String,
    /// Target architecture, as in [`std::env::consts::ARCH`].
    pub arch: String,
    /// Target operating system, as in [`std::env::consts::OS`].
    pub platform: String,
    /// Engine-specific compatibility tag.
    pub engine_tag: String,
}

impl SnapshotMetadata {
    /// Metadata describing the running host with the given engine tag.
    #[must_use]
    pub fn for_host(host_version: &str, engine_tag: &str) -> Self {
        Self {
            host_version: host_version.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            platform: std::env::consts::OS.to_owned(),
            engine_tag: engine_tag.to_owned(),
        }
    }

    /// Checks that a blob described by `self` can run on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Incompatible`] naming the first differing field.
    pub fn check_compatible(&self, host: &Self) -> Result<(), BlobError> {
        let fields = [
            ("host version", &self.host_version, &host.host_version),
            ("architecture", &self.arch, &host.arch),
            ("platform", &self.platform, &host.platform),
            ("engine tag", &self.engine_tag, &host.engine_tag),
        ];
        for (field, found, expected) in fields {
            if found != expected {
                return Err(BlobError::Incompatible {
                    field,
                    found: found.clone(),
                    expected: expected.clone(),
                });
            }
        }
        Ok(())
    }
}
