//! Crypto provider settings and the TOML configuration file.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use kindle_config::{
    DEFAULT_CRYPTO_CONF, DEFAULT_CRYPTO_SECTION, HostConfig, HostOptions, SHARED_CRYPTO_SECTION,
};

/// Bytes drawn by the secure-random self-test unless configured.
pub const DEFAULT_SELF_TEST_BYTES: usize = 32;

const MAX_SELF_TEST_BYTES: i64 = 4096;

/// Settings handed to the crypto worker once options are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoSettings {
    /// Configuration file to read.
    pub config_path: Utf8PathBuf,
    /// `true` when the path is the built-in default, which may be absent.
    pub path_is_default: bool,
    /// Table read from the file.
    pub section: &'static str,
    /// FIPS was requested on the command line.
    pub fips_requested: bool,
    /// Extra certificate bundle to hand to the provider.
    pub extra_ca_certs: Option<Utf8PathBuf>,
}

impl CryptoSettings {
    /// Resolves the configuration path: option, then environment, then the
    /// built-in default.
    #[must_use]
    pub fn resolve(options: &HostOptions, host: &HostConfig) -> Self {
        let explicit = options
            .crypto_config
            .as_deref()
            .or_else(|| host.crypto_conf());
        let section = if options.crypto_shared_config {
            SHARED_CRYPTO_SECTION
        } else {
            DEFAULT_CRYPTO_SECTION
        };
        Self {
            config_path: explicit.map_or_else(
                || Utf8PathBuf::from(DEFAULT_CRYPTO_CONF),
                Utf8Path::to_path_buf,
            ),
            path_is_default: explicit.is_none(),
            section,
            fips_requested: options.fips_requested(),
            extra_ca_certs: host.extra_ca_certs().map(Utf8Path::to_path_buf),
        }
    }
}

/// Provider parameters after the file has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Enable the FIPS module.
    pub fips: bool,
    /// Bytes drawn by the self-test.
    pub self_test_bytes: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            fips: false,
            self_test_bytes: DEFAULT_SELF_TEST_BYTES,
        }
    }
}

/// Problems reading the crypto configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("{path}: {source}")]
    Unreadable {
        /// File path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The file is not valid TOML.
    #[error("{path}: {source}")]
    Syntax {
        /// File path.
        path: Utf8PathBuf,
        /// Parser failure.
        #[source]
        source: toml::de::Error,
    },
    /// The section contains a key the provider does not understand.
    #[error("{path}: unknown directive `{key}` in section [{section}]")]
    UnknownDirective {
        /// File path.
        path: Utf8PathBuf,
        /// Section name.
        section: String,
        /// Offending key.
        key: String,
    },
    /// A recognised key has the wrong type or range.
    #[error("{path}: `{key}` must be {expected}")]
    InvalidValue {
        /// File path.
        path: Utf8PathBuf,
        /// Offending key.
        key: String,
        /// Description of valid values.
        expected: &'static str,
    },
}

/// Reads the provider configuration described by `settings`.
///
/// A missing default file yields the defaults; a missing explicit file is an
/// error. FIPS from the command line is merged in.
///
/// # Errors
///
/// Returns [`ConfigFileError`] for unreadable or invalid files.
pub fn load(settings: &CryptoSettings) -> Result<ProviderConfig, ConfigFileError> {
    let path = &settings.config_path;
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if settings.path_is_default && error.kind() == io::ErrorKind::NotFound => {
            return Ok(ProviderConfig {
                fips: settings.fips_requested,
                ..ProviderConfig::default()
            });
        }
        Err(source) => {
            return Err(ConfigFileError::Unreadable {
                path: path.clone(),
                source,
            });
        }
    };
    let mut config = parse(path, &contents, settings.section)?;
    config.fips |= settings.fips_requested;
    Ok(config)
}

/// Parses one section of a configuration file. An absent section yields the
/// defaults.
///
/// # Errors
///
/// Returns [`ConfigFileError`] for syntax errors, unknown keys or bad values.
pub fn parse(
    path: &Utf8Path,
    contents: &str,
    section: &str,
) -> Result<ProviderConfig, ConfigFileError> {
    let document: toml::Table = contents.parse().map_err(|source| ConfigFileError::Syntax {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = ProviderConfig::default();
    let Some(table) = document.get(section).and_then(toml::Value::as_table) else {
        return Ok(config);
    };
    let invalid = |key: &str, expected| ConfigFileError::InvalidValue {
        path: path.to_path_buf(),
        key: key.to_owned(),
        expected,
    };
    for (key, value) in table {
        match key.as_str() {
            "fips" => config.fips = value.as_bool().ok_or_else(|| invalid(key.as_str(), "a boolean"))?,
            "self_test_bytes" => {
                let bytes = value
                    .as_integer()
                    .filter(|bytes| (1..=MAX_SELF_TEST_BYTES).contains(bytes))
                    .and_then(|bytes| usize::try_from(bytes).ok())
                    .ok_or_else(|| invalid(key.as_str(), "an integer between 1 and 4096"))?;
                config.self_test_bytes = bytes;
            }
            _ => {
                return Err(ConfigFileError::UnknownDirective {
                    path: path.to_path_buf(),
                    section: section.to_owned(),
                    key: key.clone(),
                });
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PATH: &str = "/etc/kindle/crypto.toml";

    fn parse_section(contents: &str, section: &str) -> Result<ProviderConfig, ConfigFileError> {
        parse(Utf8Path::new(PATH), contents, section)
    }

    #[rstest]
    fn option_beats_environment_for_the_path() {
        let options = HostOptions {
            crypto_config: Some(Utf8PathBuf::from("/cli.toml")),
            ..HostOptions::default()
        };
        let host = HostConfig {
            crypto_conf: Some("/env.toml".to_owned()),
            ..HostConfig::default()
        };
        let settings = CryptoSettings::resolve(&options, &host);
        assert_eq!(settings.config_path, "/cli.toml");
        assert!(!settings.path_is_default);

        let settings = CryptoSettings::resolve(&HostOptions::default(), &host);
        assert_eq!(settings.config_path, "/env.toml");

        let settings = CryptoSettings::resolve(&HostOptions::default(), &HostConfig::default());
        assert_eq!(settings.config_path, DEFAULT_CRYPTO_CONF);
        assert!(settings.path_is_default);
    }

    #[rstest]
    fn shared_flag_selects_the_shared_section() {
        let options = HostOptions {
            crypto_shared_config: true,
            ..HostOptions::default()
        };
        let settings = CryptoSettings::resolve(&options, &HostConfig::default());
        assert_eq!(settings.section, SHARED_CRYPTO_SECTION);
    }

    #[rstest]
    fn reads_only_the_selected_section() {
        let contents = "[kindle_conf]\nfips = true\nself_test_bytes = 64\n[crypto_conf]\nfips = false\n";
        let config = parse_section(contents, "kindle_conf").expect("valid config");
        assert_eq!(config, ProviderConfig {
            fips: true,
            self_test_bytes: 64
        });
        let shared = parse_section(contents, "crypto_conf").expect("valid config");
        assert!(!shared.fips);
    }

    #[rstest]
    fn unknown_keys_are_rejected() {
        let error = parse_section("[kindle_conf]\nengine = \"gost\"\n", "kindle_conf")
            .expect_err("unknown key");
        assert!(matches!(error, ConfigFileError::UnknownDirective { ref key, .. } if key == "engine"));
    }

    #[rstest]
    #[case("[kindle_conf]\nfips = 1\n")]
    #[case("[kindle_conf]\nself_test_bytes = 0\n")]
    fn bad_values_are_rejected(#[case] contents: &str) {
        assert!(matches!(
            parse_section(contents, "kindle_conf"),
            Err(ConfigFileError::InvalidValue { .. })
        ));
    }

    #[rstest]
    fn syntax_errors_are_reported() {
        assert!(matches!(
            parse_section("[kindle_conf\n", "kindle_conf"),
            Err(ConfigFileError::Syntax { .. })
        ));
    }

    #[rstest]
    fn missing_default_file_uses_defaults() {
        let settings = CryptoSettings {
            config_path: Utf8PathBuf::from("/nonexistent/kindle/crypto.toml"),
            path_is_default: true,
            section: DEFAULT_CRYPTO_SECTION,
            fips_requested: false,
            extra_ca_certs: None,
        };
        assert_eq!(load(&settings).expect("defaults"), ProviderConfig::default());

        let explicit = CryptoSettings {
            path_is_default: false,
            ..settings
        };
        assert!(matches!(
            load(&explicit),
            Err(ConfigFileError::Unreadable { .. })
        ));
    }
}
