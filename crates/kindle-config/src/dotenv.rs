//! Reader for `--env-file` files.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Failure to read an environment file.
#[derive(Debug, Error)]
pub enum EnvFileError {
    /// The file could not be opened.
    #[error("{path}: not found")]
    NotFound {
        /// File that was requested.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A line is not a comment, blank, or `KEY=VALUE` pair.
    #[error("{path}: invalid format")]
    InvalidFormat {
        /// File containing the line.
        path: Utf8PathBuf,
        /// One-based line number.
        line: usize,
    },
}

/// Ordered `KEY=VALUE` entries read from one or more files.
///
/// Later assignments replace earlier ones but keep their original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    /// Reads and merges `path` into the current entries.
    ///
    /// # Errors
    ///
    /// Returns [`EnvFileError`] when the file is missing or malformed.
    pub fn load(&mut self, path: &Utf8Path) -> Result<(), EnvFileError> {
        let contents = fs::read_to_string(path).map_err(|source| EnvFileError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_str(path, &contents)
    }

    /// Parses `contents` as if read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvFileError::InvalidFormat`] on the first bad line.
    pub fn merge_str(&mut self, path: &Utf8Path, contents: &str) -> Result<(), EnvFileError> {
        for (index, line) in contents.lines().enumerate() {
            let invalid = || EnvFileError::InvalidFormat {
                path: path.to_path_buf(),
                line: index + 1,
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").map_or(line, str::trim_start);
            let (key, value) = line.split_once('=').ok_or_else(invalid)?;
            let key = key.trim();
            if !is_valid_key(key) {
                return Err(invalid());
            }
            let value = parse_value(value.trim()).ok_or_else(invalid)?;
            self.insert(key, value);
        }
        Ok(())
    }

    fn insert(&mut self, key: &str, value: String) {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_owned(), value)),
        }
    }

    /// Value assigned to `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// All entries in first-assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns `true` when no entries were read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-')
}

fn parse_value(raw: &str) -> Option<String> {
    if let Some(rest) = raw.strip_prefix('"') {
        let inner = rest.strip_suffix('"')?;
        return Some(inner.replace("\\n", "\n"));
    }
    if let Some(rest) = raw.strip_prefix('\'') {
        return rest.strip_suffix('\'').map(str::to_owned);
    }
    let unquoted = raw
        .split_once(" #")
        .map_or(raw, |(value, _comment)| value)
        .trim_end();
    Some(unquoted.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn parse(contents: &str) -> Result<EnvFile, EnvFileError> {
        let mut file = EnvFile::default();
        file.merge_str(Utf8Path::new(".env"), contents)?;
        Ok(file)
    }

    #[rstest]
    fn reads_plain_and_quoted_values() {
        let file = match parse(
            "# comment\n\nA=1\nexport B='two words'\nC=\"line\\nbreak\"\nD=x # trailing\n",
        ) {
            Ok(file) => file,
            Err(error) => panic!("parse failed: {error}"),
        };
        assert_eq!(file.get("A"), Some("1"));
        assert_eq!(file.get("B"), Some("two words"));
        assert_eq!(file.get("C"), Some("line\nbreak"));
        assert_eq!(file.get("D"), Some("x"));
    }

    #[rstest]
    #[case("NOEQUALS")]
    #[case("1BAD=x")]
    #[case("A=\"open")]
    fn malformed_lines_name_the_file(#[case] contents: &str) {
        match parse(contents) {
            Err(error @ EnvFileError::InvalidFormat { .. }) => {
                assert_eq!(error.to_string(), ".env: invalid format");
            }
            other => panic!("expected invalid format, got {other:?}"),
        }
    }

    #[rstest]
    fn later_files_override_earlier_entries() {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let first = dir.path().join("first.env");
        let second = dir.path().join("second.env");
        if let Err(error) = fs::write(&first, "A=1\nB=1\n") {
            panic!("write failed: {error}");
        }
        if let Err(error) = fs::write(&second, "B=2\n") {
            panic!("write failed: {error}");
        }

        let mut file = EnvFile::default();
        for path in [first, second] {
            let path = match Utf8PathBuf::from_path_buf(path) {
                Ok(path) => path,
                Err(path) => panic!("non UTF-8 path: {}", path.display()),
            };
            if let Err(error) = file.load(&path) {
                panic!("load failed: {error}");
            }
        }
        let collected: Vec<_> = file.iter().collect();
        assert_eq!(collected, [("A", "1"), ("B", "2")]);
    }

    #[rstest]
    fn missing_file_is_reported() {
        let mut file = EnvFile::default();
        let error = match file.load(Utf8Path::new("/nonexistent/kindle.env")) {
            Err(error) => error,
            Ok(()) => panic!("missing file should fail"),
        };
        assert_eq!(error.to_string(), "/nonexistent/kindle.env: not found");
    }
}
