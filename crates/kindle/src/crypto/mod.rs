//! Crypto provider configuration on the background worker.

pub mod config;
mod entropy;

use std::fs;
use std::sync::Mutex;
use std::sync::mpsc::Receiver;

use camino::{Utf8Path, Utf8PathBuf};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::{debug, warn};

pub use config::{ConfigFileError, CryptoSettings, ProviderConfig};
pub use entropy::{CryptoState, EntropySource};

use crate::exit_code::ExitCode;

pub(crate) const CRYPTO_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::crypto");

/// Failures reported by crypto initialisation.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The configuration file could not be used.
    #[error("crypto provider configuration error:\n{0}")]
    Config(#[from] ConfigFileError),
    /// The provider has no FIPS module or refused to enable it.
    #[error("crypto provider error when trying to enable FIPS:\n{0}")]
    FipsUnavailable(String),
    /// The secure-random self-test failed.
    #[error("crypto provider secure random self-test failed")]
    SelfTest,
    /// An extra certificate bundle could not be loaded.
    #[error("cannot load extra CA certificates from {path}: {reason}")]
    Certificates {
        /// Bundle path.
        path: Utf8PathBuf,
        /// Why it was rejected.
        reason: String,
    },
}

impl CryptoError {
    /// Exit status for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        let code = match self {
            Self::Config(ConfigFileError::Unreadable { .. }) => 20,
            Self::Config(ConfigFileError::Syntax { .. } | ConfigFileError::InvalidValue { .. }) => 21,
            Self::Config(ConfigFileError::UnknownDirective { .. }) => 22,
            Self::FipsUnavailable(_) | Self::Certificates { .. } => 23,
            Self::SelfTest => 24,
        };
        ExitCode::Provider(code)
    }
}

/// The cryptographic provider driven by the bootstrap.
pub trait CryptoProvider: Send + Sync {
    /// Applies the parsed configuration, enabling FIPS if asked.
    fn configure(&self, config: &ProviderConfig) -> Result<(), CryptoError>;

    /// Fills `buf` with secure random bytes. Returns `false` on failure.
    fn secure_random(&self, buf: &mut [u8]) -> bool;

    /// Adds the certificates in a PEM bundle to the trust store. Returns how
    /// many were added.
    fn add_trusted_certificates(&self, path: &Utf8Path) -> Result<usize, CryptoError>;
}

/// Provider backed by the operating system's CSPRNG. It has no FIPS module.
#[derive(Debug, Default)]
pub struct OsCryptoProvider {
    trusted: Mutex<Vec<String>>,
}

impl OsCryptoProvider {
    /// Builds a provider with an empty extra trust store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of extra certificates added so far.
    #[must_use]
    pub fn trusted_count(&self) -> usize {
        self.trusted
            .lock()
            .map_or(0, |trusted| trusted.len())
    }
}

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

impl CryptoProvider for OsCryptoProvider {
    fn configure(&self, config: &ProviderConfig) -> Result<(), CryptoError> {
        if config.fips {
            return Err(CryptoError::FipsUnavailable(
                "the operating system provider has no FIPS module".to_owned(),
            ));
        }
        Ok(())
    }

    fn secure_random(&self, buf: &mut [u8]) -> bool {
        OsRng.try_fill_bytes(buf).is_ok()
    }

    fn add_trusted_certificates(&self, path: &Utf8Path) -> Result<usize, CryptoError> {
        let rejected = |reason: String| CryptoError::Certificates {
            path: path.to_path_buf(),
            reason,
        };
        let contents = fs::read_to_string(path).map_err(|error| rejected(error.to_string()))?;
        let mut certificates = Vec::new();
        let mut rest = contents.as_str();
        while let Some(start) = rest.find(PEM_BEGIN) {
            let tail = rest.get(start..).unwrap_or_default();
            let end = tail
                .find(PEM_END)
                .ok_or_else(|| rejected("unterminated certificate".to_owned()))?;
            let block_len = end + PEM_END.len();
            certificates.push(tail.get(..block_len).unwrap_or_default().to_owned());
            rest = tail.get(block_len..).unwrap_or_default();
        }
        if certificates.is_empty() {
            return Err(rejected("no certificates found".to_owned()));
        }
        let added = certificates.len();
        if let Ok(mut trusted) = self.trusted.lock() {
            trusted.extend(certificates);
        }
        Ok(added)
    }
}

/// What the crypto worker accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoOutcome {
    /// The provider is configured and self-tested.
    Configured {
        /// FIPS mode is active.
        fips: bool,
        /// Extra certificates added to the trust store.
        extra_certificates: usize,
    },
    /// Options never arrived, so nothing was configured.
    Skipped,
}

/// Body of the crypto worker: waits for settings, then configures.
///
/// The settings channel is the only input; the worker never reads option
/// state directly. A dropped sender means option processing failed.
pub(crate) fn run_worker(
    settings: &Receiver<CryptoSettings>,
    state: &CryptoState,
    provider: &dyn CryptoProvider,
) -> Result<CryptoOutcome, CryptoError> {
    match settings.recv() {
        Ok(settings) => initialize(&settings, state, provider),
        Err(_) => {
            debug!(target: CRYPTO_TARGET, "no crypto settings received; skipping");
            Ok(CryptoOutcome::Skipped)
        }
    }
}

/// Loads the configuration, applies it, and runs the self-test, all under the
/// crypto lock. Extra certificates are best-effort.
///
/// # Errors
///
/// Returns [`CryptoError`] when the configuration or FIPS request fails.
pub fn initialize(
    settings: &CryptoSettings,
    state: &CryptoState,
    provider: &dyn CryptoProvider,
) -> Result<CryptoOutcome, CryptoError> {
    let config = {
        let held = state.lock();
        let config = config::load(settings)?;
        provider.configure(&config)?;
        state.self_test_locked(&held, provider, config.self_test_bytes);
        config
    };
    debug!(
        target: CRYPTO_TARGET,
        path = %settings.config_path,
        section = settings.section,
        fips = config.fips,
        "crypto provider configured"
    );

    let extra_certificates = match settings.extra_ca_certs.as_deref() {
        Some(path) => match provider.add_trusted_certificates(path) {
            Ok(count) => count,
            Err(error) => {
                warn!(
                    target: CRYPTO_TARGET,
                    error = %error,
                    "ignoring extra CA certificates"
                );
                0
            }
        },
        None => 0,
    };

    Ok(CryptoOutcome::Configured {
        fips: config.fips,
        extra_certificates,
    })
}
