//! Values accepted by `KINDLE_LOG_FORMAT`.

use std::str::FromStr;

use strum::{Display, EnumString};

/// How the host writes its diagnostics to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One line per event, suited to a terminal. `text` is accepted too.
    #[default]
    #[strum(serialize = "compact", serialize = "text")]
    Compact,
    /// One JSON object per line with event fields flattened. `ndjson` is
    /// accepted too.
    #[strum(serialize = "json", serialize = "ndjson")]
    Json,
}

impl LogFormat {
    /// Interprets the raw variable. Blank or unrecognised values yield
    /// `None` and the caller keeps its default.
    #[must_use]
    pub fn from_env_value(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Self::from_str(raw).ok()
    }

    /// Returns `true` for machine-readable output.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}
