//! Configuration surfaces for the kindle host runtime.
//!
//! Two layers live here. [`HostConfig`] gathers the environment-derived
//! settings (`KINDLE_OPTIONS`, `KINDLE_ICU_DATA` and friends) through
//! `ortho_config`, so configuration files and environment variables share one
//! precedence model. [`HostOptions`] is the clap schema for the host's own
//! command-line options; tokens it does not recognise belong to the engine.

mod debug;
mod defaults;
mod dotenv;
mod logging;
mod options;
mod options_bundle;

use std::ffi::OsString;
use std::sync::Arc;

use camino::Utf8Path;
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use debug::{DebugCategory, DebugSettings};
pub use defaults::{
    CRYPTO_CONF_ENV_VAR, DEBUG_ENV_VAR, DEFAULT_CRYPTO_CONF, DEFAULT_CRYPTO_SECTION,
    DEFAULT_LOG_FILTER, DEFAULT_SNAPSHOT_BLOB, DEFAULT_THREAD_POOL_SIZE, EXTRA_CA_CERTS_ENV_VAR,
    ICU_DATA_ENV_VAR, ICU_DATA_FILE, LOG_FILTER_ENV_VAR, LOG_FORMAT_ENV_VAR, OPTIONS_ENV_VAR,
    PROGRAM_NAME, SHARED_CRYPTO_SECTION, TZ_ENV_VAR, default_icu_data_dir, default_log_filter,
    default_log_format,
};
pub use dotenv::{EnvFile, EnvFileError};
pub use logging::LogFormat;
pub use options::{
    BUNDLE_DISALLOWED, EmbeddedSnapshotPolicy, HostOptions, OptionToken, allowed_in_bundle,
    classify_option, option_names,
};
pub use options_bundle::{BundleError, tokenize_bundle};

/// Environment-derived host settings.
///
/// Every field maps onto a `KINDLE_*` variable. A field that is `Some` was set
/// by some layer, even if its value is empty; this matters for the options
/// bundle, where an explicitly empty variable still overrides a value from a
/// configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KINDLE")]
pub struct HostConfig {
    /// Raw options bundle merged beneath the command line.
    pub options: Option<String>,
    /// Directory holding `kindle-icu.dat`.
    pub icu_data: Option<String>,
    /// Path of the crypto provider configuration file.
    pub crypto_conf: Option<String>,
    /// Path of a PEM bundle with additional trusted certificates.
    pub extra_ca_certs: Option<String>,
}

impl HostConfig {
    /// Loads the configuration from files and environment only.
    ///
    /// The host's command line is parsed separately by [`HostOptions`], so the
    /// loader sees nothing but the program name.
    ///
    /// # Errors
    ///
    /// Returns the `ortho_config` error when a layer cannot be read or merged.
    pub fn load_layers() -> Result<Self, Arc<OrthoError>> {
        Self::load_from_iter(vec![OsString::from(PROGRAM_NAME)])
    }

    /// Raw options bundle, if any layer supplied one.
    #[must_use]
    pub fn options_bundle(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// ICU data directory configured through the environment.
    #[must_use]
    pub fn icu_data_dir(&self) -> Option<&Utf8Path> {
        self.icu_data
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .map(Utf8Path::new)
    }

    /// Crypto configuration file configured through the environment.
    #[must_use]
    pub fn crypto_conf(&self) -> Option<&Utf8Path> {
        self.crypto_conf
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(Utf8Path::new)
    }

    /// Extra certificate bundle configured through the environment.
    #[must_use]
    pub fn extra_ca_certs(&self) -> Option<&Utf8Path> {
        self.extra_ca_certs
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(Utf8Path::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn empty_paths_are_treated_as_unset() {
        let config = HostConfig {
            icu_data: Some(String::new()),
            crypto_conf: Some(String::new()),
            ..HostConfig::default()
        };
        assert!(config.icu_data_dir().is_none());
        assert!(config.crypto_conf().is_none());
    }

    #[rstest]
    fn empty_bundle_is_still_present() {
        let config = HostConfig {
            options: Some(String::new()),
            ..HostConfig::default()
        };
        assert_eq!(config.options_bundle(), Some(""));
    }
}
