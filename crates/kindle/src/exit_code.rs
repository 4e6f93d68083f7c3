//! Process exit statuses produced by the bootstrap.

/// Outcome of a bootstrap or of the main instance.
///
/// The numeric values are stable; scripts and supervisors depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    /// Everything succeeded.
    Success,
    /// A user-supplied input (script, builder, config) was unusable.
    GenericUserError,
    /// The command line could not be parsed.
    InvalidCommandLineArgument,
    /// Options parsed but were rejected during the environment pass or
    /// validation.
    InvalidCommandLineArgument2,
    /// A snapshot could not be loaded or written.
    StartupSnapshotFailure,
    /// The crypto provider refused its configuration.
    Provider(u8),
    /// Status requested by the running script.
    Script(u8),
}

impl ExitCode {
    /// Numeric process status.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::GenericUserError => 1,
            Self::InvalidCommandLineArgument => 9,
            Self::InvalidCommandLineArgument2 => 12,
            Self::StartupSnapshotFailure => 14,
            Self::Provider(code) | Self::Script(code) => code,
        }
    }

    /// Returns `true` when the status is zero.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.code() == 0
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ExitCode::Success, 0)]
    #[case(ExitCode::GenericUserError, 1)]
    #[case(ExitCode::InvalidCommandLineArgument, 9)]
    #[case(ExitCode::InvalidCommandLineArgument2, 12)]
    #[case(ExitCode::StartupSnapshotFailure, 14)]
    #[case(ExitCode::Provider(21), 21)]
    #[case(ExitCode::Script(3), 3)]
    fn numeric_values_are_stable(#[case] code: ExitCode, #[case] expected: u8) {
        assert_eq!(code.code(), expected);
    }

    #[rstest]
    fn script_zero_counts_as_success() {
        assert!(ExitCode::Script(0).is_success());
        assert!(!ExitCode::Provider(20).is_success());
    }
}
