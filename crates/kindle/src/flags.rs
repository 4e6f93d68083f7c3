//! Capabilities selecting which bootstrap phases run.

/// Named switches fixed at entry and read-only afterwards.
///
/// `Default` enables every phase except predictable snapshots and stdio
/// inheritance. Embedders that own the process environment typically turn
/// off the stdio, signal and resource-limit steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessFlags {
    /// Read `KINDLE_LOG`, `KINDLE_LOG_FORMAT` and `KINDLE_DEBUG`.
    pub parse_debug_variables: bool,
    /// Repair and record descriptors 0 to 2.
    pub stdio_initialization: bool,
    /// Let child processes inherit descriptors beyond stdio.
    pub stdio_inheritance: bool,
    /// Reset inherited signal dispositions and install exit handlers.
    pub default_signal_handling: bool,
    /// Raise the open file descriptor limit.
    pub adjust_resource_limits: bool,
    /// Configure the crypto provider on a background worker.
    pub crypto_initialization: bool,
    /// Resolve ICU data.
    pub icu: bool,
    /// Honour the `KINDLE_OPTIONS` bundle.
    pub environment_options: bool,
    /// Parse host options from the command line.
    pub cli_options: bool,
    /// Handle `--version`, `--help` and friends.
    pub print_help_or_version: bool,
    /// Initialise the engine platform.
    pub engine_platform: bool,
    /// Initialise the engine itself.
    pub engine: bool,
    /// Initialise the garbage collector subsystem.
    pub garbage_collector: bool,
    /// Build snapshots deterministically.
    pub predictable_snapshot: bool,
}

impl Default for ProcessFlags {
    fn default() -> Self {
        Self {
            parse_debug_variables: true,
            stdio_initialization: true,
            stdio_inheritance: false,
            default_signal_handling: true,
            adjust_resource_limits: true,
            crypto_initialization: true,
            icu: true,
            environment_options: true,
            cli_options: true,
            print_help_or_version: true,
            engine_platform: true,
            engine: true,
            garbage_collector: true,
            predictable_snapshot: false,
        }
    }
}

impl ProcessFlags {
    /// Flags for a host embedded in a process it does not own: no stdio,
    /// signal, resource-limit or inheritance changes.
    #[must_use]
    pub fn embedded() -> Self {
        Self {
            stdio_initialization: false,
            stdio_inheritance: true,
            default_signal_handling: false,
            adjust_resource_limits: false,
            ..Self::default()
        }
    }

    /// Returns `true` if the platform worker has anything to do.
    #[must_use]
    pub const fn touches_platform(&self) -> bool {
        self.stdio_initialization
            || !self.stdio_inheritance
            || self.default_signal_handling
            || self.adjust_resource_limits
    }
}
