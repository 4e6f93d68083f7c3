//! The bootstrap sequence.
//!
//! [`Bootstrap::initialize`] walks the phases in [`BootstrapPhase`] order.
//! Option processing runs on the calling thread while the platform and
//! crypto workers run beside it; both workers are joined on every path
//! before the result is returned. Any phase may stop the sequence early,
//! and a stopped sequence still hands back a result that can be torn down.

use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::OrthoError;
use tracing::{debug, warn};

use kindle_config::{
    EnvFile, HostConfig, HostOptions, OPTIONS_ENV_VAR, PROGRAM_NAME, default_icu_data_dir,
    tokenize_bundle,
};
use kindle_snapshot::{PackageError, PackagedResource};

use crate::context::ProcessContext;
use crate::crypto::{CryptoOutcome, CryptoProvider, CryptoSettings, CryptoState, EntropySource, OsCryptoProvider};
use crate::engine::{BindingEngine, Engine, InstanceSpec, SharedWriter};
use crate::exit_code::ExitCode;
use crate::fatal;
use crate::flags::ProcessFlags;
use crate::guard::InitGuard;
use crate::health::{BootstrapPhase, BootstrapReporter, StructuredBootstrapReporter};
use crate::i18n;
use crate::info;
use crate::options::{ClapOptionProcessor, OptionError, OptionProcessor, OptionSource, ParsedOptions};
use crate::result::InitializationResult;
use crate::snapshot::{SnapshotFailure, SnapshotManager};
use crate::telemetry::{self, TelemetrySettings};
use crate::validation;
use crate::workers::Workers;

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Loads the layered host configuration.
pub trait HostConfigLoader: Send + Sync {
    /// Loads defaults, the configuration file and `KINDLE_*` variables.
    fn load(&self) -> Result<HostConfig, Arc<OrthoError>>;
}

/// Loader that delegates to [`HostConfig::load_layers`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostConfigLoader;

impl HostConfigLoader for SystemHostConfigLoader {
    fn load(&self) -> Result<HostConfig, Arc<OrthoError>> {
        HostConfig::load_layers()
    }
}

/// Loader returning a fixed configuration, for embedders that resolve
/// settings themselves.
#[derive(Debug, Default, Clone)]
pub struct StaticHostConfigLoader {
    config: HostConfig,
}

impl StaticHostConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

impl HostConfigLoader for StaticHostConfigLoader {
    fn load(&self) -> Result<HostConfig, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Everything the bootstrap talks to.
pub struct Collaborators {
    /// The scripting engine.
    pub engine: Box<dyn Engine>,
    /// The cryptographic provider.
    pub crypto: Arc<dyn CryptoProvider>,
    /// Argument parser.
    pub options: Box<dyn OptionProcessor>,
    /// Layered configuration loader.
    pub host_config: Box<dyn HostConfigLoader>,
    /// Resource carried by a packaged executable.
    pub package: Result<Option<PackagedResource>, PackageError>,
    /// Lifecycle observer.
    pub reporter: Arc<dyn BootstrapReporter>,
    /// Destination for `--version`, `--help` and similar output.
    pub stdout: SharedWriter,
}

impl Collaborators {
    /// The production set: [`BindingEngine`], [`OsCryptoProvider`], clap
    /// options, layered configuration and the running executable's package
    /// trailer.
    #[must_use]
    pub fn system(stdout: SharedWriter, stderr: SharedWriter) -> Self {
        Self {
            engine: Box::new(BindingEngine::new(stdout.clone(), stderr)),
            crypto: Arc::new(OsCryptoProvider::new()),
            options: Box::new(ClapOptionProcessor::new()),
            host_config: Box::new(SystemHostConfigLoader),
            package: current_package(),
            reporter: Arc::new(StructuredBootstrapReporter::new()),
            stdout,
        }
    }
}

fn current_package() -> Result<Option<PackagedResource>, PackageError> {
    let Some(path) = std::env::current_exe()
        .ok()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
    else {
        return Ok(None);
    };
    PackagedResource::from_executable(&path)
}

/// One bootstrap run bound to an init guard.
pub struct Bootstrap<'g> {
    guard: &'g InitGuard,
    collaborators: Collaborators,
}

impl<'g> Bootstrap<'g> {
    /// Prepares a run. Nothing happens until [`Bootstrap::initialize`].
    #[must_use]
    pub fn new(guard: &'g InitGuard, collaborators: Collaborators) -> Self {
        Self {
            guard,
            collaborators,
        }
    }

    /// Runs the sequence.
    ///
    /// Aborts the process if `guard` was already claimed, if a worker
    /// panics, if the platform cannot be put into a known state, or if the
    /// engine fails to start. Every other failure is reported through the
    /// result.
    #[must_use]
    pub fn initialize(self, mut args: Vec<String>, flags: ProcessFlags) -> InitializationResult {
        self.guard.claim();
        let Collaborators {
            engine,
            crypto,
            options,
            host_config,
            package,
            reporter,
            stdout,
        } = self.collaborators;

        if args.is_empty() {
            args.push(PROGRAM_NAME.to_owned());
        }
        let (package, package_error) = match package {
            Ok(package) => (package, None),
            Err(error) => (None, Some(error)),
        };
        if package.is_some() {
            // A packaged executable is its own entry point: every argument
            // the user typed belongs to the script.
            let program = args.first().cloned().unwrap_or_default();
            args.insert(1, program);
        }

        let context = ProcessContext::new(flags, Arc::new(CryptoState::new()), engine);
        let mut run = Run {
            result: InitializationResult::new(context, args),
            crypto,
            options,
            host_config,
            package,
            package_error,
            reporter,
            stdout,
        };
        let outcome = run.sequence();
        run.finish(outcome)
    }
}

/// The sequence stopped before `Ready` with this status.
struct Halt {
    code: ExitCode,
}

struct Run {
    result: InitializationResult,
    crypto: Arc<dyn CryptoProvider>,
    options: Box<dyn OptionProcessor>,
    host_config: Box<dyn HostConfigLoader>,
    package: Option<PackagedResource>,
    package_error: Option<PackageError>,
    reporter: Arc<dyn BootstrapReporter>,
    stdout: SharedWriter,
}

impl Run {
    fn enter(&mut self, phase: BootstrapPhase) {
        self.result.phase = phase;
        self.reporter.phase_entered(phase);
    }

    fn halt(&mut self, code: ExitCode, error: impl Display) -> Halt {
        self.result.push_error(error);
        Halt { code }
    }

    fn halt_all(&mut self, code: ExitCode, errors: Vec<OptionError>) -> Halt {
        for error in errors {
            self.result.push_error(error);
        }
        Halt { code }
    }

    fn sequence(&mut self) -> Result<(), Halt> {
        self.enter(BootstrapPhase::Created);
        let flags = *self.result.context.flags();

        if flags.parse_debug_variables {
            parse_debug_variables();
        }
        self.enter(BootstrapPhase::DebugConfigParsed);

        let trap_hook = self.result.context.engine().trap_hook();
        let state = Arc::clone(self.result.context.crypto_state());
        let mut workers = Workers::launch(&flags, trap_hook, &state, &self.crypto);
        self.enter(BootstrapPhase::WorkersLaunched);

        let prepared = self.process_options(&flags, &mut workers);
        let (parsed, host) = match prepared {
            Ok(prepared) => prepared,
            Err(halt) => {
                // The workers are joined before the result leaves, even here.
                self.join_workers(workers).ok();
                return Err(halt);
            }
        };

        self.enter(BootstrapPhase::EntropyRegistered);
        let entropy = EntropySource::new(state, Arc::clone(&self.crypto));
        self.result.context.engine_mut().set_entropy_source(entropy);

        self.join_workers(workers)?;
        self.enter(BootstrapPhase::WorkersJoined);

        self.enter(BootstrapPhase::HelpOrVersionHandled);
        if flags.print_help_or_version && parsed.options.wants_early_exit() {
            self.print_information(&parsed.options);
            return Err(Halt {
                code: ExitCode::Success,
            });
        }

        self.initialize_engine(&flags, parsed.options.thread_pool_size);
        self.enter(BootstrapPhase::EngineInitialized);

        self.resolve_snapshot(&flags, &parsed)?;
        debug!(
            target: BOOTSTRAP_TARGET,
            crypto_conf = host.crypto_conf().map(|path| path.as_str()),
            "bootstrap ready"
        );
        Ok(())
    }

    /// Parses the command line, env files and the options bundle, then
    /// validates the merged options.
    fn process_options(
        &mut self,
        flags: &ProcessFlags,
        workers: &mut Workers,
    ) -> Result<(ParsedOptions, HostConfig), Halt> {
        let host = self.host_config.load().map_err(|error| {
            self.halt(
                ExitCode::InvalidCommandLineArgument2,
                format_args!("failed to load configuration: {error}"),
            )
        })?;

        let args = self.result.args.clone();
        let cli = if flags.cli_options {
            self.options
                .parse(&args, OptionSource::CommandLine)
                .map_err(|errors| self.halt_all(ExitCode::InvalidCommandLineArgument, errors))?
        } else {
            ParsedOptions::passthrough(&args)
        };

        let mut env_file = EnvFile::default();
        for path in &cli.options.env_file {
            env_file
                .load(path)
                .map_err(|error| self.halt(ExitCode::InvalidCommandLineArgument2, error))?;
        }

        let bundle = if flags.environment_options {
            host.options_bundle()
                .or_else(|| env_file.get(OPTIONS_ENV_VAR))
                .filter(|raw| !raw.trim().is_empty())
                .map(str::to_owned)
        } else {
            None
        };
        let parsed = match bundle {
            Some(raw) => self.merge_bundle(&raw, cli)?,
            None => cli,
        };

        self.result.args.clone_from(&parsed.args);
        self.result.exec_args.clone_from(&parsed.exec_args);
        self.result.env = env_file
            .iter()
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();

        self.enter(BootstrapPhase::OptionsReady);
        self.validate(flags, &parsed, &host)?;

        workers.send_crypto_settings(CryptoSettings::resolve(&parsed.options, &host));
        Ok((parsed, host))
    }

    /// Re-parses `bundle tokens + command-line options + script` so the
    /// command line wins. `exec_args` stay the command line's own.
    fn merge_bundle(&mut self, raw: &str, cli: ParsedOptions) -> Result<ParsedOptions, Halt> {
        let program = cli.args.first().cloned().unwrap_or_else(|| PROGRAM_NAME.to_owned());
        let tokens = tokenize_bundle(raw)
            .map_err(|error| self.halt(ExitCode::InvalidCommandLineArgument2, error))?;

        let mut bundle_args = vec![program.clone()];
        bundle_args.extend(tokens);
        let bundle = self
            .options
            .parse(&bundle_args, OptionSource::OptionsBundle)
            .map_err(|errors| self.halt_all(ExitCode::InvalidCommandLineArgument2, errors))?;

        let mut merged = vec![program];
        merged.extend(bundle.exec_args);
        merged.extend(cli.exec_args.iter().cloned());
        if cli.args.len() > 1 {
            merged.push("--".to_owned());
            merged.extend(cli.args.iter().skip(1).cloned());
        }
        let mut parsed = self
            .options
            .parse(&merged, OptionSource::CommandLine)
            .map_err(|errors| self.halt_all(ExitCode::InvalidCommandLineArgument, errors))?;
        parsed.exec_args = cli.exec_args;
        Ok(parsed)
    }

    fn validate(
        &mut self,
        flags: &ProcessFlags,
        parsed: &ParsedOptions,
        host: &HostConfig,
    ) -> Result<(), Halt> {
        let options = &parsed.options;

        let mut engine_flags = parsed.engine_flags.clone();
        if options.build_snapshot || flags.predictable_snapshot {
            engine_flags.extend(validation::predictable_engine_flags());
        }
        let rejected = self
            .result
            .context
            .engine_mut()
            .set_flags_from_command_line(&engine_flags);
        if !rejected.is_empty() {
            let errors = rejected.into_iter().map(OptionError::BadOption).collect();
            return Err(self.halt_all(ExitCode::InvalidCommandLineArgument, errors));
        }
        self.result.engine_flags = engine_flags;

        let reverts = validation::security_reverts(options)
            .map_err(|error| self.halt(error.exit_code(), error))?;
        for revert in &reverts {
            debug!(target: BOOTSTRAP_TARGET, id = revert.id, "security fix reverted");
        }
        self.result.context.set_security_reverts(reverts);

        validation::disable_proto(options)
            .and_then(|()| validation::build_snapshot(parsed))
            .map_err(|error| self.halt(error.exit_code(), error))?;

        if flags.icu {
            let icu = i18n::resolve(
                options.icu_data_dir.as_deref(),
                host.icu_data_dir(),
                default_icu_data_dir(),
            )
            .map_err(|error| self.halt(ExitCode::InvalidCommandLineArgument, error))?;
            self.result.icu = Some(icu);
        }

        #[cfg(not(unix))]
        if let Ok(zone) = std::env::var(kindle_config::TZ_ENV_VAR) {
            if !zone.is_empty() {
                self.result.context.engine_mut().set_default_time_zone(&zone);
            }
        }

        if let Some(title) = options.title.as_deref() {
            apply_title(title);
        }
        Ok(())
    }

    fn join_workers(&mut self, workers: Workers) -> Result<(), Halt> {
        let results = workers.join();
        match results.platform {
            Some(Ok(handle)) => self.result.context.set_platform(handle),
            Some(Err(fault)) => {
                self.reporter.worker_failed("platform", &fault.to_string());
                fatal::abort("platform initialization", &fault);
            }
            None => {}
        }
        match results.crypto {
            Some(Ok(CryptoOutcome::Configured {
                fips,
                extra_certificates,
            })) => {
                debug!(target: BOOTSTRAP_TARGET, fips, extra_certificates, "crypto ready");
                Ok(())
            }
            Some(Err(error)) => {
                self.reporter.worker_failed("crypto", &error.to_string());
                Err(self.halt(error.exit_code(), error))
            }
            Some(Ok(CryptoOutcome::Skipped)) | None => Ok(()),
        }
    }

    /// Prints the first informational output requested: version, help,
    /// completion script, then engine options.
    fn print_information(&mut self, options: &HostOptions) {
        let text = if options.version {
            info::version()
        } else if options.help {
            info::help()
        } else if options.completion_bash {
            info::completion_bash()
        } else {
            self.result.context.engine().flag_help()
        };
        let newline = if text.ends_with('\n') { "" } else { "\n" };
        if let Err(error) = write!(self.stdout, "{text}{newline}").and_then(|()| self.stdout.flush()) {
            warn!(target: BOOTSTRAP_TARGET, error = %error, "cannot write informational output");
        }
    }

    /// Starts the engine platform, collector and runtime. A failure here
    /// leaves a half-started engine, so it aborts.
    fn initialize_engine(&mut self, flags: &ProcessFlags, thread_pool_size: u16) {
        let context = &mut self.result.context;
        if flags.engine_platform {
            if let Err(error) = context.engine_mut().initialize_platform(thread_pool_size) {
                fatal::abort("engine platform initialization", &error);
            }
            context.started_mut().engine_platform = true;
        }
        if flags.garbage_collector {
            if let Err(error) = context.engine_mut().initialize_gc() {
                fatal::abort("garbage collector initialization", &error);
            }
            context.started_mut().garbage_collector = true;
        }
        if flags.engine {
            if let Err(error) = context.engine_mut().initialize() {
                fatal::abort("engine initialization", &error);
            }
            context.started_mut().engine = true;
        }
    }

    /// Builds a snapshot and stops, or picks one and creates the main
    /// instance.
    fn resolve_snapshot(&mut self, flags: &ProcessFlags, parsed: &ParsedOptions) -> Result<(), Halt> {
        if let Some(error) = self.package_error.take() {
            let failure = SnapshotFailure::Package(error);
            return Err(self.halt(failure.exit_code(), failure));
        }
        let manager = SnapshotManager::new(self.result.context.engine().snapshot_tag());

        if parsed.options.build_snapshot {
            let predictable = self
                .result
                .engine_flags
                .iter()
                .any(|flag| flag == "--predictable");
            let built = manager
                .build(self.result.context.engine_mut(), parsed, predictable)
                .map_err(|error| self.halt(error.exit_code(), error))?;
            self.result.built_snapshot = Some(built);
            self.enter(BootstrapPhase::SnapshotResolved);
            return Err(Halt {
                code: ExitCode::Success,
            });
        }

        let embedded = self.result.context.engine().embedded_snapshot();
        let resolved = manager
            .resolve(self.package.as_ref(), &parsed.options, embedded)
            .map_err(|error| self.halt(error.exit_code(), error))?;
        self.enter(BootstrapPhase::SnapshotResolved);

        if flags.engine {
            let inline_script = match self.package.take() {
                Some(PackagedResource::Script(source)) => Some(source),
                _ => None,
            };
            let spec = InstanceSpec {
                args: self.result.args.clone(),
                exec_args: self.result.exec_args.clone(),
                snapshot: resolved.as_ref().map(|resolved| &resolved.data),
                inline_script,
                env: self.result.env.clone(),
            };
            let instance = self
                .result
                .context
                .engine_mut()
                .create_main_instance(spec)
                .map_err(|error| self.halt(ExitCode::GenericUserError, error))?;
            self.result.main_instance = Some(instance);
        }
        self.result.snapshot = resolved.map(|resolved| (resolved.data, resolved.source));

        self.enter(BootstrapPhase::Ready);
        Ok(())
    }

    fn finish(mut self, outcome: Result<(), Halt>) -> InitializationResult {
        match outcome {
            Ok(()) => {
                self.result.exit_code = ExitCode::Success;
                self.result.early_return = false;
                self.reporter.ready();
            }
            Err(Halt { code }) => {
                let code = if code.is_success() && !self.result.errors.is_empty() {
                    ExitCode::GenericUserError
                } else {
                    code
                };
                self.result.exit_code = code;
                self.result.early_return = true;
                self.reporter.early_return(self.result.phase, code);
            }
        }
        self.result
    }
}

fn parse_debug_variables() {
    let settings = TelemetrySettings::from_env();
    // Best effort: a bad filter leaves logging off but never stops startup.
    telemetry::initialise(&settings).ok();
    for category in settings.debug.unknown() {
        warn!(target: BOOTSTRAP_TARGET, category = %category, "unknown KINDLE_DEBUG category");
    }
}

fn apply_title(title: &str) {
    #[cfg(target_os = "linux")]
    if let Ok(name) = std::ffi::CString::new(title) {
        // The kernel truncates to 15 bytes.
        unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0) };
    }
    debug!(target: BOOTSTRAP_TARGET, title, "process title set");
}
