//! Parsing of the `KINDLE_DEBUG` category list.

use std::str::FromStr;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::defaults::DEBUG_ENV_VAR;

/// Components that can be switched to debug-level logging individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DebugCategory {
    /// Phase ordering and teardown.
    Bootstrap,
    /// Option merging and validation.
    Options,
    /// Stdio, signals and resource limits.
    Platform,
    /// Crypto provider configuration and entropy.
    Crypto,
    /// Snapshot resolution and building.
    Snapshot,
    /// Engine lifecycle.
    Engine,
}

impl DebugCategory {
    /// Tracing target owned by this category.
    #[must_use]
    pub fn target(self) -> String {
        format!("kindle::{self}")
    }
}

/// Debug categories requested through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugSettings {
    categories: Vec<DebugCategory>,
    unknown: Vec<String>,
}

impl DebugSettings {
    /// Reads `KINDLE_DEBUG` from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Reads the category list through `lookup`.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        lookup(DEBUG_ENV_VAR).map_or_else(Self::default, |raw| Self::parse(&raw))
    }

    /// Parses a comma separated category list. `*` and `all` select every
    /// category; unrecognised names are kept so they can be reported.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut settings = Self::default();
        for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            if name == "*" || name.eq_ignore_ascii_case("all") {
                for category in DebugCategory::iter() {
                    settings.push(category);
                }
                continue;
            }
            match DebugCategory::from_str(name) {
                Ok(category) => settings.push(category),
                Err(_) => settings.unknown.push(name.to_owned()),
            }
        }
        settings
    }

    fn push(&mut self, category: DebugCategory) {
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
    }

    /// Categories enabled at debug level, in first-seen order.
    #[must_use]
    pub fn categories(&self) -> &[DebugCategory] {
        &self.categories
    }

    /// Names that did not match any category.
    #[must_use]
    pub fn unknown(&self) -> &[String] {
        &self.unknown
    }

    /// Returns `true` when `category` was requested.
    #[must_use]
    pub fn is_enabled(&self, category: DebugCategory) -> bool {
        self.categories.contains(&category)
    }

    /// Filter directives raising each requested category to debug.
    #[must_use]
    pub fn filter_directives(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|category| format!("{}=debug", category.target()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", &[])]
    #[case("crypto", &[DebugCategory::Crypto])]
    #[case("Snapshot, crypto,snapshot", &[DebugCategory::Snapshot, DebugCategory::Crypto])]
    fn parses_category_lists(#[case] raw: &str, #[case] expected: &[DebugCategory]) {
        assert_eq!(DebugSettings::parse(raw).categories(), expected);
    }

    #[rstest]
    fn wildcard_enables_everything() {
        let settings = DebugSettings::parse("*");
        assert_eq!(settings.categories().len(), DebugCategory::iter().count());
    }

    #[rstest]
    fn unknown_names_are_retained() {
        let settings = DebugSettings::parse("crypto,gremlins");
        assert_eq!(settings.unknown(), ["gremlins".to_owned()]);
        assert!(settings.is_enabled(DebugCategory::Crypto));
    }

    #[rstest]
    fn directives_target_component_namespaces() {
        let settings = DebugSettings::from_vars(|key| {
            (key == DEBUG_ENV_VAR).then(|| "platform".to_owned())
        });
        assert_eq!(settings.filter_directives(), ["kindle::platform=debug"]);
    }
}
