//! Checks applied to the merged options before anything acts on them.

use thiserror::Error;

use kindle_config::HostOptions;

use crate::exit_code::ExitCode;
use crate::options::ParsedOptions;

/// A security fix that can be reverted with `--security-revert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRevert {
    /// Identifier accepted on the command line.
    pub id: &'static str,
    /// What reverting restores.
    pub description: &'static str,
}

/// Reverts this host knows how to apply.
pub const SECURITY_REVERTS: &[SecurityRevert] = &[SecurityRevert {
    id: "CVE-2023-46809",
    description: "Accept PKCS#1 v1.5 padding for RSA private decryption",
}];

/// Rejections found while validating options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `--security-revert` named an unknown identifier.
    #[error("Error: Attempt to revert an unknown CVE ({0})")]
    UnknownRevert(String),
    /// `--disable-proto` was neither `delete` nor `throw`.
    #[error("invalid mode passed to --disable-proto")]
    DisableProtoMode,
    /// `--build-snapshot` had no builder to run.
    #[error("--build-snapshot must be used with an entry point script.\nUsage: kindle --build-snapshot <builder-script>")]
    MissingBuilder,
}

impl ValidationError {
    /// Exit status for this rejection.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::UnknownRevert(_) | Self::DisableProtoMode => ExitCode::InvalidCommandLineArgument2,
            Self::MissingBuilder => ExitCode::InvalidCommandLineArgument,
        }
    }
}

/// Looks up every requested revert. Stops at the first unknown identifier.
///
/// # Errors
///
/// Returns [`ValidationError::UnknownRevert`] naming the identifier.
pub fn security_reverts(options: &HostOptions) -> Result<Vec<SecurityRevert>, ValidationError> {
    options
        .security_revert
        .iter()
        .map(|id| {
            SECURITY_REVERTS
                .iter()
                .find(|revert| revert.id == id.as_str())
                .copied()
                .ok_or_else(|| ValidationError::UnknownRevert(id.clone()))
        })
        .collect()
}

/// Accepts an absent mode, `delete` or `throw`.
///
/// # Errors
///
/// Returns [`ValidationError::DisableProtoMode`] for anything else.
pub fn disable_proto(options: &HostOptions) -> Result<(), ValidationError> {
    match options.disable_proto.as_deref() {
        None | Some("" | "delete" | "throw") => Ok(()),
        Some(_) => Err(ValidationError::DisableProtoMode),
    }
}

/// Build mode needs a builder from the command line or a config file.
///
/// # Errors
///
/// Returns [`ValidationError::MissingBuilder`] when neither is present.
pub fn build_snapshot(parsed: &ParsedOptions) -> Result<(), ValidationError> {
    let options = &parsed.options;
    if options.build_snapshot
        && options.build_snapshot_config.is_none()
        && parsed.entry_script().is_none()
    {
        return Err(ValidationError::MissingBuilder);
    }
    Ok(())
}

/// Engine flags implied by a predictable or build-mode run.
#[must_use]
pub fn predictable_engine_flags() -> [String; 2] {
    ["--predictable".to_owned(), "--random-seed=42".to_owned()]
}
