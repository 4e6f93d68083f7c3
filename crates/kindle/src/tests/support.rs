//! Test harness utilities for the bootstrap suites.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use kindle_config::{EXTRA_CA_CERTS_ENV_VAR, HostConfig, ICU_DATA_ENV_VAR, OPTIONS_ENV_VAR};
use kindle_snapshot::{PackageError, PackagedResource, SnapshotConfig};

use crate::bootstrap::{Bootstrap, Collaborators, HostConfigLoader, StaticHostConfigLoader};
use crate::crypto::{CryptoProvider, EntropySource, OsCryptoProvider};
use crate::engine::{BindingEngine, Engine, EngineError, InstanceSpec, MainInstance, SharedWriter};
use crate::exit_code::ExitCode;
use crate::flags::ProcessFlags;
use crate::guard::InitGuard;
use crate::health::{BootstrapPhase, BootstrapReporter};
use crate::options::ClapOptionProcessor;
use crate::platform::TrapHook;
use crate::result::InitializationResult;
use crate::teardown::{self, TeardownReport};

/// Flags that leave the test process's descriptors, signals and limits
/// alone.
pub fn quiet_flags() -> ProcessFlags {
    ProcessFlags {
        parse_debug_variables: false,
        ..ProcessFlags::embedded()
    }
}

/// Scenario world shared across steps.
pub struct TestWorld {
    _dir: TempDir,
    root: Utf8PathBuf,
    host: HostConfig,
    failing_loader: bool,
    package: Option<Result<Option<PackagedResource>, PackageError>>,
    provider: Arc<dyn CryptoProvider>,
    pub flags: ProcessFlags,
    pub args: Vec<String>,
    pub reporter: Arc<RecordingReporter>,
    pub lifecycle: Lifecycle,
    pub stdout: Captured,
    pub stderr: Captured,
    result: Option<InitializationResult>,
    run_status: Option<ExitCode>,
    teardown: Option<TeardownReport>,
}

impl TestWorld {
    /// Builds a world whose crypto configuration is an empty file.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temporary directory");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("UTF-8 path");
        let crypto_conf = root.join("crypto.toml");
        fs::write(&crypto_conf, "").expect("write crypto configuration");
        Self {
            _dir: dir,
            root,
            host: HostConfig {
                crypto_conf: Some(crypto_conf.into_string()),
                ..HostConfig::default()
            },
            failing_loader: false,
            package: None,
            provider: Arc::new(OsCryptoProvider::new()),
            flags: quiet_flags(),
            args: vec!["kindle".to_owned()],
            reporter: Arc::new(RecordingReporter::default()),
            lifecycle: Lifecycle::default(),
            stdout: Captured::default(),
            stderr: Captured::default(),
            result: None,
            run_status: None,
            teardown: None,
        }
    }

    /// The scratch directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Absolute path of `name` inside the scratch directory.
    pub fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    /// Writes `contents` to `name` inside the scratch directory.
    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> Utf8PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("write scratch file");
        path
    }

    /// Appends command-line tokens after `argv[0]`.
    pub fn push_args(&mut self, tokens: &[&str]) {
        self.args.extend(tokens.iter().map(|token| (*token).to_owned()));
    }

    /// Sets the options bundle as if `KINDLE_OPTIONS` held `raw`.
    pub fn set_bundle(&mut self, raw: &str) {
        self.host.options = Some(raw.to_owned());
    }

    /// Points the ICU data directory at `dir`.
    pub fn set_icu_data(&mut self, dir: &Utf8Path) {
        self.host.icu_data = Some(dir.to_string());
    }

    /// Makes configuration loading fail.
    pub fn use_failing_loader(&mut self) {
        self.failing_loader = true;
    }

    /// Pretends the executable carries `package`.
    pub fn use_package(&mut self, package: Result<Option<PackagedResource>, PackageError>) {
        self.package = Some(package);
    }

    /// Runs the bootstrap once with a fresh guard.
    pub fn bootstrap(&mut self) {
        if self.result.is_some() {
            return;
        }
        let stdout = SharedWriter::new(self.stdout.clone());
        let stderr = SharedWriter::new(self.stderr.clone());
        let engine = RecordingEngine::new(
            BindingEngine::new(stdout.clone(), stderr),
            self.lifecycle.clone(),
        );
        let host_config: Box<dyn HostConfigLoader> = if self.failing_loader {
            Box::new(FailingHostConfigLoader)
        } else {
            Box::new(StaticHostConfigLoader::new(self.host.clone()))
        };
        let collaborators = Collaborators {
            engine: Box::new(engine),
            crypto: Arc::clone(&self.provider),
            options: Box::new(ClapOptionProcessor::new()),
            host_config,
            package: self.package.take().unwrap_or(Ok(None)),
            reporter: self.reporter.clone(),
            stdout,
        };
        let guard = InitGuard::new();
        let result = Bootstrap::new(&guard, collaborators).initialize(self.args.clone(), self.flags);
        assert!(guard.is_claimed());
        self.result = Some(result);
    }

    /// Runs the main instance, if the bootstrap produced one.
    pub fn run_instance(&mut self) {
        let result = self.result.as_mut().expect("bootstrap has run");
        if let Some(mut instance) = result.take_main_instance() {
            self.run_status = Some(instance.run());
        }
    }

    /// Tears the result down. The result stays readable so its context can
    /// be inspected afterwards.
    pub fn teardown(&mut self) {
        if self.teardown.is_some() {
            return;
        }
        if let Some(result) = self.result.as_mut() {
            drop(result.take_main_instance());
            self.teardown = Some(teardown::run(&mut result.context));
        }
    }

    /// The bootstrap result.
    pub fn result(&self) -> &InitializationResult {
        self.result.as_ref().expect("bootstrap has run")
    }

    /// Status returned by the main instance.
    pub fn run_status(&self) -> Option<ExitCode> {
        self.run_status
    }

    /// The teardown report.
    pub fn teardown_report(&self) -> &TeardownReport {
        self.teardown.as_ref().expect("teardown has run")
    }

    /// Clears the previous run so the world can bootstrap again.
    pub fn reset(&mut self) {
        self.teardown();
        self.result = None;
        self.args.truncate(1);
        self.reporter = Arc::new(RecordingReporter::default());
        self.lifecycle = Lifecycle::default();
        self.stdout = Captured::default();
        self.stderr = Captured::default();
        self.run_status = None;
        self.teardown = None;
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Re-executes this test binary to run only `test`, with `marker` set in
/// the child's environment. Tests that change process-wide state guard
/// themselves on `marker` and run only in the child.
pub fn run_in_child(test: &str, marker: &str, envs: &[(&str, &str)]) -> Output {
    let exe = std::env::current_exe().expect("test binary path");
    Command::new(exe)
        .args(["--exact", test, "--nocapture", "--test-threads=1"])
        .env(marker, "1")
        .envs(envs.iter().copied())
        .env_remove(OPTIONS_ENV_VAR)
        .env_remove(ICU_DATA_ENV_VAR)
        .env_remove(EXTRA_CA_CERTS_ENV_VAR)
        .output()
        .expect("re-run the test binary")
}

/// Builds the scenario world.
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

/// Loader that fails by handing the parser an unknown option.
struct FailingHostConfigLoader;

impl HostConfigLoader for FailingHostConfigLoader {
    fn load(&self) -> Result<HostConfig, Arc<OrthoError>> {
        HostConfig::load_from_iter(vec![
            OsString::from("kindle"),
            OsString::from("--no-such-setting"),
        ])
    }
}

/// Lifecycle events recorded by the reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Phase(BootstrapPhase),
    EarlyReturn(BootstrapPhase, ExitCode),
    WorkerFailed(String),
    Ready,
}

/// Records lifecycle events for assertions.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("reporter mutex poisoned").clone()
    }

    /// Phases entered, in order.
    pub fn phases(&self) -> Vec<BootstrapPhase> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Phase(phase) => Some(phase),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().expect("reporter mutex poisoned").push(event);
    }
}

impl BootstrapReporter for RecordingReporter {
    fn phase_entered(&self, phase: BootstrapPhase) {
        self.record(Event::Phase(phase));
    }

    fn early_return(&self, phase: BootstrapPhase, code: ExitCode) {
        self.record(Event::EarlyReturn(phase, code));
    }

    fn worker_failed(&self, worker: &str, _message: &str) {
        self.record(Event::WorkerFailed(worker.to_owned()));
    }

    fn ready(&self) {
        self.record(Event::Ready);
    }
}

/// Engine lifecycle calls, shared between a world and its engine.
#[derive(Clone, Default)]
pub struct Lifecycle(Arc<Mutex<Vec<&'static str>>>);

impl Lifecycle {
    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().expect("lifecycle mutex poisoned").clone()
    }

    fn record(&self, call: &'static str) {
        self.0.lock().expect("lifecycle mutex poisoned").push(call);
    }
}

/// [`BindingEngine`] that records every lifecycle call.
pub struct RecordingEngine {
    inner: BindingEngine,
    lifecycle: Lifecycle,
}

impl RecordingEngine {
    pub fn new(inner: BindingEngine, lifecycle: Lifecycle) -> Self {
        Self { inner, lifecycle }
    }
}

impl Engine for RecordingEngine {
    fn snapshot_tag(&self) -> &str {
        self.inner.snapshot_tag()
    }

    fn set_flags_from_command_line(&mut self, flags: &[String]) -> Vec<String> {
        self.lifecycle.record("set_flags");
        self.inner.set_flags_from_command_line(flags)
    }

    fn flag_help(&self) -> String {
        self.inner.flag_help()
    }

    fn set_entropy_source(&mut self, source: EntropySource) {
        self.lifecycle.record("set_entropy_source");
        self.inner.set_entropy_source(source);
    }

    fn set_default_time_zone(&mut self, zone: &str) {
        self.inner.set_default_time_zone(zone);
    }

    fn trap_hook(&self) -> Option<TrapHook> {
        self.inner.trap_hook()
    }

    fn initialize_platform(&mut self, thread_pool_size: u16) -> Result<(), EngineError> {
        self.lifecycle.record("initialize_platform");
        self.inner.initialize_platform(thread_pool_size)
    }

    fn initialize_gc(&mut self) -> Result<(), EngineError> {
        self.lifecycle.record("initialize_gc");
        self.inner.initialize_gc()
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        self.lifecycle.record("initialize");
        self.inner.initialize()
    }

    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    fn shutdown_gc(&mut self) {
        self.lifecycle.record("shutdown_gc");
        self.inner.shutdown_gc();
    }

    fn dispose(&mut self) {
        self.lifecycle.record("dispose");
        self.inner.dispose();
    }

    fn dispose_platform(&mut self) {
        self.lifecycle.record("dispose_platform");
        self.inner.dispose_platform();
    }

    fn embedded_snapshot(&self) -> Option<&'static [u8]> {
        self.inner.embedded_snapshot()
    }

    fn generate_snapshot(
        &mut self,
        source: &str,
        args: &[String],
        exec_args: &[String],
        config: &SnapshotConfig,
    ) -> Result<Vec<u8>, EngineError> {
        self.lifecycle.record("generate_snapshot");
        self.inner.generate_snapshot(source, args, exec_args, config)
    }

    fn create_main_instance(
        &mut self,
        spec: InstanceSpec<'_>,
    ) -> Result<Box<dyn MainInstance>, EngineError> {
        self.lifecycle.record("create_main_instance");
        self.inner.create_main_instance(spec)
    }
}

/// In-memory writer whose contents can be read back.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    /// Everything written so far.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("capture mutex poisoned")).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("capture mutex poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
