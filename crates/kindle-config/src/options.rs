//! Command-line schema for options the host itself understands.

use camino::Utf8PathBuf;
use clap::{CommandFactory, Parser};

use crate::defaults::DEFAULT_THREAD_POOL_SIZE;

/// Options consumed by the host before the engine sees the command line.
///
/// Help and version are ordinary flags so the bootstrap decides how and when
/// to print them.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "kindle",
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
pub struct HostOptions {
    /// Print usage information and exit.
    #[arg(short = 'h', long)]
    pub help: bool,
    /// Print the host version and exit.
    #[arg(short = 'v', long)]
    pub version: bool,
    /// Print a bash completion word list and exit.
    #[arg(long)]
    pub completion_bash: bool,
    /// Print the engine's own options and exit.
    #[arg(long)]
    pub engine_options: bool,
    /// Run the entry script and write a snapshot instead of executing it.
    #[arg(long)]
    pub build_snapshot: bool,
    /// JSON file describing a snapshot build.
    #[arg(long, value_name = "PATH")]
    pub build_snapshot_config: Option<Utf8PathBuf>,
    /// Snapshot blob to load, or to write when building.
    #[arg(long, value_name = "PATH")]
    pub snapshot_blob: Option<Utf8PathBuf>,
    /// Require the embedded snapshot.
    #[arg(long, overrides_with = "no_embedded_snapshot")]
    pub embedded_snapshot: bool,
    /// Never use the embedded snapshot.
    #[arg(long, overrides_with = "embedded_snapshot")]
    pub no_embedded_snapshot: bool,
    /// Crypto provider configuration file.
    #[arg(long, value_name = "PATH")]
    pub crypto_config: Option<Utf8PathBuf>,
    /// Read the shared section of the crypto configuration.
    #[arg(long)]
    pub crypto_shared_config: bool,
    /// Request FIPS mode from the crypto provider.
    #[arg(long)]
    pub enable_fips: bool,
    /// Require FIPS mode from the crypto provider.
    #[arg(long)]
    pub force_fips: bool,
    /// Revert a security fix by identifier.
    #[arg(long, value_name = "ID")]
    pub security_revert: Vec<String>,
    /// How the engine should treat the prototype accessor.
    #[arg(long, value_name = "MODE")]
    pub disable_proto: Option<String>,
    /// Directory holding ICU data.
    #[arg(long, value_name = "DIR")]
    pub icu_data_dir: Option<Utf8PathBuf>,
    /// Size of the engine worker pool.
    #[arg(
        long,
        value_name = "N",
        default_value_t = DEFAULT_THREAD_POOL_SIZE,
        value_parser = clap::value_parser!(u16).range(1..=1024)
    )]
    pub thread_pool_size: u16,
    /// Environment file loaded before option validation.
    #[arg(long, value_name = "PATH")]
    pub env_file: Vec<Utf8PathBuf>,
    /// Process title.
    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            help: false,
            version: false,
            completion_bash: false,
            engine_options: false,
            build_snapshot: false,
            build_snapshot_config: None,
            snapshot_blob: None,
            embedded_snapshot: false,
            no_embedded_snapshot: false,
            crypto_config: None,
            crypto_shared_config: false,
            enable_fips: false,
            force_fips: false,
            security_revert: Vec::new(),
            disable_proto: None,
            icu_data_dir: None,
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            env_file: Vec::new(),
            title: None,
        }
    }
}

/// Whether and how the embedded snapshot should be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedSnapshotPolicy {
    /// Use it when present and valid; fall back quietly otherwise.
    Implicit,
    /// `--embedded-snapshot` was given; failure to use it is fatal.
    Required,
    /// `--no-embedded-snapshot` was given.
    Disabled,
}

impl HostOptions {
    /// Returns `true` when a FIPS mode was requested by either flag.
    #[must_use]
    pub const fn fips_requested(&self) -> bool {
        self.enable_fips || self.force_fips
    }

    /// Resolves the embedded-snapshot flags; the last one given wins.
    #[must_use]
    pub const fn embedded_snapshot_policy(&self) -> EmbeddedSnapshotPolicy {
        if self.no_embedded_snapshot {
            EmbeddedSnapshotPolicy::Disabled
        } else if self.embedded_snapshot {
            EmbeddedSnapshotPolicy::Required
        } else {
            EmbeddedSnapshotPolicy::Implicit
        }
    }

    /// Returns `true` when an informational flag ends the bootstrap early.
    #[must_use]
    pub const fn wants_early_exit(&self) -> bool {
        self.help || self.version || self.completion_bash || self.engine_options
    }

    /// Rendered usage text.
    #[must_use]
    pub fn usage() -> String {
        Self::command().render_help().to_string()
    }
}

/// Long names of options that may only appear on the real command line.
pub const BUNDLE_DISALLOWED: &[&str] = &[
    "help",
    "version",
    "completion-bash",
    "engine-options",
    "build-snapshot",
    "build-snapshot-config",
    "env-file",
];

/// How a raw token relates to the host schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionToken {
    /// A host option. `long` is its canonical long name and `needs_value` is
    /// set when the value arrives as the following token.
    Host {
        /// Canonical long name without dashes.
        long: String,
        /// The next token is this option's value.
        needs_value: bool,
    },
    /// Looks like an option but is not the host's; forwarded to the engine.
    Foreign,
    /// Not an option at all: the script path or a script argument.
    Positional,
}

/// Classifies a single command-line token against [`HostOptions`].
#[must_use]
pub fn classify_option(token: &str) -> OptionToken {
    if token == "-" || !token.starts_with('-') {
        return OptionToken::Positional;
    }
    let (name, inline_value) = match token.split_once('=') {
        Some((name, _)) => (name, true),
        None => (token, false),
    };
    let command = HostOptions::command();
    let found = if let Some(long) = name.strip_prefix("--") {
        command
            .get_arguments()
            .find(|arg| arg.get_long() == Some(long))
    } else {
        let mut shorts = name.trim_start_matches('-').chars();
        match (shorts.next(), shorts.next()) {
            (Some(short), None) => command
                .get_arguments()
                .find(|arg| arg.get_short() == Some(short)),
            _ => None,
        }
    };
    found
        .and_then(|arg| {
            arg.get_long().map(|long| OptionToken::Host {
                long: long.to_owned(),
                needs_value: !inline_value && arg.get_action().takes_values(),
            })
        })
        .unwrap_or(OptionToken::Foreign)
}

/// Returns `false` for host options that the options bundle may not carry.
#[must_use]
pub fn allowed_in_bundle(token: &str) -> bool {
    match classify_option(token) {
        OptionToken::Host { long, .. } => !BUNDLE_DISALLOWED.contains(&long.as_str()),
        OptionToken::Foreign | OptionToken::Positional => true,
    }
}

/// Every spelling of every host option, for shell completion.
#[must_use]
pub fn option_names() -> Vec<String> {
    let command = HostOptions::command();
    let mut names = Vec::new();
    for arg in command.get_arguments() {
        if let Some(long) = arg.get_long() {
            names.push(format!("--{long}"));
        }
        if let Some(short) = arg.get_short() {
            names.push(format!("-{short}"));
        }
    }
    names.sort();
    names
}
