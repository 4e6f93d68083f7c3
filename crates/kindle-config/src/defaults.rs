//! Built-in defaults shared by the bootstrap and its collaborators.

/// Name of the host binary, used as `argv[0]` when none is available.
pub const PROGRAM_NAME: &str = "kindle";

/// Environment variable carrying the options bundle.
pub const OPTIONS_ENV_VAR: &str = "KINDLE_OPTIONS";

/// Environment variable naming the ICU data directory.
pub const ICU_DATA_ENV_VAR: &str = "KINDLE_ICU_DATA";

/// Environment variable naming the crypto provider configuration file.
pub const CRYPTO_CONF_ENV_VAR: &str = "KINDLE_CRYPTO_CONF";

/// Environment variable naming extra trusted certificates.
pub const EXTRA_CA_CERTS_ENV_VAR: &str = "KINDLE_EXTRA_CA_CERTS";

/// Environment variable consulted for the default time zone.
pub const TZ_ENV_VAR: &str = "TZ";

/// Environment variable holding the base log filter.
pub const LOG_FILTER_ENV_VAR: &str = "KINDLE_LOG";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV_VAR: &str = "KINDLE_LOG_FORMAT";

/// Environment variable listing debug categories.
pub const DEBUG_ENV_VAR: &str = "KINDLE_DEBUG";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Default size of the engine worker thread pool.
pub const DEFAULT_THREAD_POOL_SIZE: u16 = 4;

/// File written by `--build-snapshot` when `--snapshot-blob` is absent.
pub const DEFAULT_SNAPSHOT_BLOB: &str = "snapshot.blob";

/// Crypto provider configuration consulted when nothing else is configured.
pub const DEFAULT_CRYPTO_CONF: &str = "/etc/kindle/crypto.toml";

/// Section of the crypto configuration read by default.
pub const DEFAULT_CRYPTO_SECTION: &str = "kindle_conf";

/// Section read when `--crypto-shared-config` is given.
pub const SHARED_CRYPTO_SECTION: &str = "crypto_conf";

/// File that must exist inside an ICU data directory.
pub const ICU_DATA_FILE: &str = "kindle-icu.dat";

/// Default log filter expression used by the binary.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binary.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::default()
}

/// ICU data directory baked in at build time, if any.
#[must_use]
pub fn default_icu_data_dir() -> Option<&'static str> {
    option_env!("KINDLE_ICU_DEFAULT_DATA_DIR")
}
