//! Process bootstrap for the `kindle` scripting host.
//!
//! [`initialize`] prepares the process exactly once: it parses options
//! from the command line, `--env-file` files and the `KINDLE_OPTIONS`
//! bundle, while a platform worker repairs the standard descriptors, resets
//! inherited signal dispositions and raises the open file limit, and a
//! crypto worker loads the provider configuration and runs its self-test.
//! Once both workers are joined the engine is started, a startup snapshot
//! is chosen (or built and written, in `--build-snapshot` mode) and the
//! main instance is created.
//!
//! The returned [`InitializationResult`] carries every error found along
//! the way together with a stable [`ExitCode`]. [`InitializationResult::teardown`]
//! restores the standard descriptors and signal dispositions and stops the
//! collector, the engine and its platform in that order.
//!
//! ## Collaborators
//!
//! The bootstrap drives an [`Engine`], a [`CryptoProvider`] and an
//! [`OptionProcessor`] through traits. [`Bootstrap`] accepts any set of
//! them, which is how the tests run the full sequence in-process;
//! [`initialize`] uses [`Collaborators::system`].
//!
//! ## Signal safety
//!
//! Only [`platform::reset_stdio`] may run inside a signal handler. It
//! neither allocates nor locks. Engine disposal happens in
//! [`InitializationResult::teardown`], never from signal context.

mod bootstrap;
mod context;
pub mod crypto;
pub mod engine;
mod exit_code;
mod fatal;
mod flags;
mod guard;
mod health;
pub mod i18n;
mod info;
pub mod launcher;
pub mod options;
pub mod platform;
mod result;
pub mod snapshot;
mod teardown;
pub mod telemetry;
pub mod validation;
mod workers;

pub use bootstrap::{
    Bootstrap, Collaborators, HostConfigLoader, StaticHostConfigLoader, SystemHostConfigLoader,
};
pub use context::{ProcessContext, StartedSubsystems};
pub use crypto::{CryptoError, CryptoProvider, CryptoState, EntropySource, OsCryptoProvider};
pub use engine::{BindingEngine, Engine, EngineError, InstanceSpec, MainInstance, SharedWriter};
pub use exit_code::ExitCode;
pub use flags::ProcessFlags;
pub use guard::{InitGuard, PROCESS_GUARD};
pub use health::{BootstrapPhase, BootstrapReporter, StructuredBootstrapReporter};
pub use options::{ClapOptionProcessor, OptionError, OptionProcessor, OptionSource, ParsedOptions};
pub use platform::{PlatformFault, PlatformHandle};
pub use result::InitializationResult;
pub use teardown::{TeardownReport, TeardownStep};

/// Runs the bootstrap with the production collaborators.
///
/// May be called once per process. A second call aborts.
#[must_use]
pub fn initialize(args: Vec<String>, flags: ProcessFlags) -> InitializationResult {
    let collaborators = Collaborators::system(SharedWriter::stdout(), SharedWriter::stderr());
    Bootstrap::new(&PROCESS_GUARD, collaborators).initialize(args, flags)
}

#[cfg(test)]
mod tests;
