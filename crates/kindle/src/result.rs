//! What the bootstrap hands back to its caller.

use std::fmt;

use camino::Utf8Path;

use kindle_snapshot::SnapshotData;

use crate::context::ProcessContext;
use crate::engine::MainInstance;
use crate::exit_code::ExitCode;
use crate::health::BootstrapPhase;
use crate::i18n::IcuData;
use crate::platform::PlatformHandle;
use crate::snapshot::{BuiltSnapshot, SnapshotSource};
use crate::teardown::{self, TeardownReport};

/// Outcome of [`crate::initialize`].
///
/// Errors are only ever appended. When [`InitializationResult::early_return`]
/// is set there is no main instance and the caller should print the errors,
/// tear down and exit with [`InitializationResult::exit_code`].
pub struct InitializationResult {
    pub(crate) args: Vec<String>,
    pub(crate) exec_args: Vec<String>,
    pub(crate) engine_flags: Vec<String>,
    pub(crate) errors: Vec<String>,
    pub(crate) exit_code: ExitCode,
    pub(crate) early_return: bool,
    pub(crate) phase: BootstrapPhase,
    pub(crate) main_instance: Option<Box<dyn MainInstance>>,
    pub(crate) snapshot: Option<(SnapshotData, SnapshotSource)>,
    pub(crate) built_snapshot: Option<BuiltSnapshot>,
    pub(crate) icu: Option<IcuData>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) context: ProcessContext,
}

impl fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializationResult")
            .field("args", &self.args)
            .field("exec_args", &self.exec_args)
            .field("engine_flags", &self.engine_flags)
            .field("errors", &self.errors)
            .field("exit_code", &self.exit_code)
            .field("early_return", &self.early_return)
            .field("phase", &self.phase)
            .field("main_instance", &self.main_instance.is_some())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl InitializationResult {
    pub(crate) fn new(context: ProcessContext, args: Vec<String>) -> Self {
        Self {
            args,
            exec_args: Vec::new(),
            engine_flags: Vec::new(),
            errors: Vec::new(),
            exit_code: ExitCode::Success,
            early_return: false,
            phase: BootstrapPhase::Created,
            main_instance: None,
            snapshot: None,
            built_snapshot: None,
            icu: None,
            env: Vec::new(),
            context,
        }
    }

    /// `argv[0]`, the entry script and its arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Option tokens from the command line.
    #[must_use]
    pub fn exec_args(&self) -> &[String] {
        &self.exec_args
    }

    /// Flags handed to the engine.
    #[must_use]
    pub fn engine_flags(&self) -> &[String] {
        &self.engine_flags
    }

    /// Human-readable errors, in the order they were found.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Exit status of the bootstrap.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    /// Returns `true` if the caller should not run a main instance.
    #[must_use]
    pub const fn early_return(&self) -> bool {
        self.early_return
    }

    /// Phase reached: the terminal phase, or the one that stopped early.
    #[must_use]
    pub const fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// What platform initialisation changed, if it ran.
    #[must_use]
    pub const fn platform(&self) -> Option<&PlatformHandle> {
        self.context.platform()
    }

    /// The snapshot in use and where it came from.
    #[must_use]
    pub fn snapshot(&self) -> Option<(&SnapshotData, &SnapshotSource)> {
        self.snapshot.as_ref().map(|(data, source)| (data, source))
    }

    /// The blob written in build mode.
    #[must_use]
    pub const fn built_snapshot(&self) -> Option<&BuiltSnapshot> {
        self.built_snapshot.as_ref()
    }

    /// Destination of the blob written in build mode.
    #[must_use]
    pub fn built_snapshot_path(&self) -> Option<&Utf8Path> {
        self.built_snapshot.as_ref().map(|built| built.path.as_path())
    }

    /// ICU data chosen, if ICU was resolved.
    #[must_use]
    pub const fn icu(&self) -> Option<&IcuData> {
        self.icu.as_ref()
    }

    /// Variables read from `--env-file`.
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Process-wide state for this run.
    #[must_use]
    pub const fn context(&self) -> &ProcessContext {
        &self.context
    }

    /// Returns `true` while a main instance is held.
    #[must_use]
    pub const fn has_main_instance(&self) -> bool {
        self.main_instance.is_some()
    }

    /// Takes the main instance. It must be dropped before teardown.
    pub fn take_main_instance(&mut self) -> Option<Box<dyn MainInstance>> {
        self.main_instance.take()
    }

    pub(crate) fn push_error(&mut self, error: impl fmt::Display) {
        self.errors.push(error.to_string());
    }

    /// Releases the main instance if still held, then reverses the
    /// bootstrap. Consuming `self` makes a second teardown impossible.
    #[must_use]
    pub fn teardown(mut self) -> TeardownReport {
        drop(self.main_instance.take());
        teardown::run(&mut self.context)
    }
}
