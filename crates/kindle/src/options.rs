//! Splitting argument vectors into host options, engine flags and script
//! arguments.

use clap::Parser;
use thiserror::Error;

use kindle_config::{HostOptions, OptionToken, allowed_in_bundle, classify_option};

/// Where a token list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionSource {
    /// The process command line.
    CommandLine,
    /// The `KINDLE_OPTIONS` bundle.
    OptionsBundle,
}

/// A parsed argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOptions {
    /// Host options after clap has applied defaults and overrides.
    pub options: HostOptions,
    /// `argv[0]`, the entry script and its arguments.
    pub args: Vec<String>,
    /// Every option token consumed before the entry script.
    pub exec_args: Vec<String>,
    /// Option tokens the host does not know; candidates for the engine.
    pub engine_flags: Vec<String>,
}

impl ParsedOptions {
    /// Options used when command-line parsing is disabled: everything after
    /// `argv[0]` belongs to the script.
    #[must_use]
    pub fn passthrough(args: &[String]) -> Self {
        Self {
            options: HostOptions::default(),
            args: args.to_vec(),
            exec_args: Vec::new(),
            engine_flags: Vec::new(),
        }
    }

    /// The entry script, if one was given.
    #[must_use]
    pub fn entry_script(&self) -> Option<&str> {
        self.args.get(1).map(String::as_str)
    }
}

/// Errors produced while splitting or validating option tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    /// A value-taking option was last on the line.
    #[error("{option} requires an argument")]
    MissingValue {
        /// The option token.
        option: String,
    },
    /// An option may not be set through the bundle.
    #[error("{option} is not allowed in KINDLE_OPTIONS")]
    NotAllowedInBundle {
        /// Option name without its value.
        option: String,
    },
    /// clap rejected the host options.
    #[error("{0}")]
    Schema(String),
    /// The engine rejected a flag.
    #[error("bad option: {0}")]
    BadOption(String),
}

/// Parses argument vectors for the bootstrap.
pub trait OptionProcessor: Send + Sync {
    /// Parses `args`, whose first element is the program name.
    ///
    /// Errors are returned together, in the order they were found.
    fn parse(&self, args: &[String], source: OptionSource) -> Result<ParsedOptions, Vec<OptionError>>;
}

/// [`OptionProcessor`] backed by the clap schema in [`HostOptions`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ClapOptionProcessor;

impl ClapOptionProcessor {
    /// Builds a new processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct Split {
    host_tokens: Vec<String>,
    exec_args: Vec<String>,
    engine_flags: Vec<String>,
    positionals: Vec<String>,
}

fn split(tokens: &[String], source: OptionSource) -> Result<Split, Vec<OptionError>> {
    let mut split = Split {
        host_tokens: Vec::new(),
        exec_args: Vec::new(),
        engine_flags: Vec::new(),
        positionals: Vec::new(),
    };
    let mut errors = Vec::new();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        if token == "--" {
            split.positionals.extend(iter.by_ref().cloned());
            break;
        }
        match classify_option(token) {
            OptionToken::Positional => {
                split.positionals.push(token.clone());
                split.positionals.extend(iter.by_ref().cloned());
                break;
            }
            OptionToken::Host { needs_value, .. } => {
                if source == OptionSource::OptionsBundle && !allowed_in_bundle(token) {
                    let name = token.split_once('=').map_or(token.as_str(), |(name, _)| name);
                    errors.push(OptionError::NotAllowedInBundle {
                        option: name.to_owned(),
                    });
                    continue;
                }
                split.host_tokens.push(token.clone());
                split.exec_args.push(token.clone());
                if needs_value {
                    match iter.next() {
                        Some(value) => {
                            split.host_tokens.push(value.clone());
                            split.exec_args.push(value.clone());
                        }
                        None => errors.push(OptionError::MissingValue {
                            option: token.clone(),
                        }),
                    }
                }
            }
            OptionToken::Foreign => {
                split.engine_flags.push(token.clone());
                split.exec_args.push(token.clone());
            }
        }
    }

    if source == OptionSource::OptionsBundle {
        for positional in split.positionals.drain(..) {
            errors.push(OptionError::NotAllowedInBundle { option: positional });
        }
    }

    if errors.is_empty() {
        Ok(split)
    } else {
        Err(errors)
    }
}

fn clap_message(error: &clap::Error) -> String {
    let rendered = error.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_owned()
}

impl OptionProcessor for ClapOptionProcessor {
    fn parse(&self, args: &[String], source: OptionSource) -> Result<ParsedOptions, Vec<OptionError>> {
        let (program, tokens) = match args.split_first() {
            Some((program, tokens)) => (program.clone(), tokens),
            None => (kindle_config::PROGRAM_NAME.to_owned(), &[][..]),
        };
        let split = split(tokens, source)?;

        let clap_args = std::iter::once(program.clone()).chain(split.host_tokens);
        let options = HostOptions::try_parse_from(clap_args)
            .map_err(|error| vec![OptionError::Schema(clap_message(&error))])?;

        let mut script_args = vec![program];
        script_args.extend(split.positionals);
        Ok(ParsedOptions {
            options,
            args: script_args,
            exec_args: split.exec_args,
            engine_flags: split.engine_flags,
        })
    }
}
