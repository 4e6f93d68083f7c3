//! Global `tracing` subscriber set-up driven by the debug variables.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use kindle_config::{
    DebugSettings, LOG_FILTER_ENV_VAR, LOG_FORMAT_ENV_VAR, LogFormat, default_log_filter,
    default_log_format,
};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Logging settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// Base filter expression.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Categories raised to debug level.
    pub debug: DebugSettings,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter().to_owned(),
            format: default_log_format(),
            debug: DebugSettings::default(),
        }
    }
}

impl TelemetrySettings {
    /// Reads `KINDLE_LOG`, `KINDLE_LOG_FORMAT` and `KINDLE_DEBUG`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Reads the settings through `lookup`. Unknown formats fall back to the
    /// default rather than failing.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup(LOG_FILTER_ENV_VAR)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default_log_filter().to_owned());
        let format = lookup(LOG_FORMAT_ENV_VAR)
            .and_then(|value| LogFormat::from_env_value(&value))
            .unwrap_or_else(default_log_format);
        Self {
            filter,
            format,
            debug: DebugSettings::from_vars(&lookup),
        }
    }

    /// The combined filter expression with per-category directives appended.
    #[must_use]
    pub fn filter_expression(&self) -> String {
        let mut directives = vec![self.filter.clone()];
        directives.extend(self.debug.filter_directives());
        directives.join(",")
    }
}

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber the first time it is called.
///
/// Later calls return a handle without touching global state.
pub fn initialise(settings: &TelemetrySettings) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(settings))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(settings: &TelemetrySettings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(settings.filter_expression())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match settings.format {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        assert_eq!(TelemetrySettings::from_vars(lookup(&[])), TelemetrySettings::default());
    }

    #[rstest]
    fn unknown_format_falls_back() {
        let settings = TelemetrySettings::from_vars(lookup(&[("KINDLE_LOG_FORMAT", "xml")]));
        assert_eq!(settings.format, LogFormat::Compact);
    }

    #[rstest]
    fn format_aliases_and_blank_values() {
        let text = TelemetrySettings::from_vars(lookup(&[("KINDLE_LOG_FORMAT", "ndjson")]));
        assert!(text.format.is_structured());
        let blank = TelemetrySettings::from_vars(lookup(&[("KINDLE_LOG_FORMAT", "  ")]));
        assert_eq!(blank.format, LogFormat::Compact);
    }

    #[rstest]
    fn debug_categories_extend_the_filter() {
        let settings = TelemetrySettings::from_vars(lookup(&[
            ("KINDLE_LOG", "info"),
            ("KINDLE_LOG_FORMAT", "JSON"),
            ("KINDLE_DEBUG", "crypto,snapshot"),
        ]));
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(
            settings.filter_expression(),
            "info,kindle::crypto=debug,kindle::snapshot=debug"
        );
    }
}
