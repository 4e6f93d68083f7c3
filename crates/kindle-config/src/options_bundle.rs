//! Splitting of the `KINDLE_OPTIONS` bundle into tokens.

use thiserror::Error;

/// Problems found while splitting an options bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BundleError {
    /// A backslash inside quotes was the last character.
    #[error("invalid value for KINDLE_OPTIONS (invalid escape)")]
    InvalidEscape,
    /// A double quote was opened and never closed.
    #[error("invalid value for KINDLE_OPTIONS (unterminated string)")]
    UnterminatedString,
}

/// Splits `raw` into tokens.
///
/// Spaces separate tokens unless they appear between double quotes. Inside
/// quotes a backslash takes the next character literally. Quotes may appear
/// mid-token, so `--title="a b"` yields `--title=a b`.
///
/// # Errors
///
/// Returns [`BundleError`] for a dangling escape or an unclosed quote.
pub fn tokenize_bundle(raw: &str) -> Result<Vec<String>, BundleError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quoted => {
                let escaped = chars.next().ok_or(BundleError::InvalidEscape)?;
                current.push(escaped);
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            ' ' if !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                current.push(other);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err(BundleError::UnterminatedString);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
