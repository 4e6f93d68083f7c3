//! The scripting engine as seen by the bootstrap.
//!
//! The bootstrap never interprets scripts itself. It drives an [`Engine`]
//! through flag parsing, platform and runtime initialisation, snapshot
//! generation and main-instance creation, and disposes of it in reverse.

mod binding;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use kindle_snapshot::{SnapshotConfig, SnapshotData};

pub use binding::{BindingEngine, BindingInstance};

use crate::crypto::EntropySource;
use crate::exit_code::ExitCode;
use crate::platform::TrapHook;

/// Failures reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A lifecycle call arrived out of order.
    #[error("engine lifecycle violation: {0}")]
    Lifecycle(&'static str),
    /// The entropy source could not supply bytes.
    #[error("entropy source failed")]
    Entropy,
    /// A script failed.
    #[error("{origin}:{line}: {message}")]
    Script {
        /// Script name.
        origin: String,
        /// One-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// A builder script asked to exit with a non-zero status.
    #[error("builder script exited with status {0}")]
    BuilderExit(u8),
    /// A snapshot payload could not be decoded.
    #[error("snapshot payload is not usable by this engine: {0}")]
    Payload(String),
    /// The entry script could not be read.
    #[error("cannot read entry script {path}: {source}")]
    EntryScript {
        /// Script path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Everything the engine needs to create the main instance.
#[derive(Debug, Default)]
pub struct InstanceSpec<'a> {
    /// `argv[0]`, the entry script and its arguments.
    pub args: Vec<String>,
    /// Option tokens consumed by the host and engine.
    pub exec_args: Vec<String>,
    /// Snapshot to restore, if any.
    pub snapshot: Option<&'a SnapshotData>,
    /// Entry script source carried by a packaged executable.
    pub inline_script: Option<String>,
    /// Variables read from `--env-file`.
    pub env: Vec<(String, String)>,
}

/// The running program.
pub trait MainInstance {
    /// Runs to completion and reports the exit status.
    fn run(&mut self) -> ExitCode;

    /// Renders a global binding, if defined.
    fn global(&self, name: &str) -> Option<String>;
}

/// Process-wide engine lifecycle.
pub trait Engine {
    /// Tag recorded in snapshot metadata; blobs with another tag are refused.
    fn snapshot_tag(&self) -> &str;

    /// Offers flags the host did not recognise. Returns the rejected ones.
    fn set_flags_from_command_line(&mut self, flags: &[String]) -> Vec<String>;

    /// Help text for engine flags.
    fn flag_help(&self) -> String;

    /// Registers the source used for hash seeds and other randomness.
    fn set_entropy_source(&mut self, source: EntropySource);

    /// Sets the zone used when the platform has none.
    fn set_default_time_zone(&mut self, _zone: &str) {}

    /// Hook that may claim a segmentation fault before it is chained.
    fn trap_hook(&self) -> Option<TrapHook> {
        None
    }

    /// Starts the embedding platform with the given worker pool size.
    fn initialize_platform(&mut self, thread_pool_size: u16) -> Result<(), EngineError>;

    /// Starts the garbage collector subsystem.
    fn initialize_gc(&mut self) -> Result<(), EngineError>;

    /// Starts the engine runtime.
    fn initialize(&mut self) -> Result<(), EngineError>;

    /// Returns `true` between [`Engine::initialize`] and [`Engine::dispose`].
    fn is_initialized(&self) -> bool;

    /// Stops the garbage collector subsystem.
    fn shutdown_gc(&mut self);

    /// Stops the engine runtime.
    fn dispose(&mut self);

    /// Releases the embedding platform.
    fn dispose_platform(&mut self);

    /// Snapshot linked into the binary, if any.
    fn embedded_snapshot(&self) -> Option<&'static [u8]>;

    /// Runs `source` in a fresh context and returns the serialised state.
    fn generate_snapshot(
        &mut self,
        source: &str,
        args: &[String],
        exec_args: &[String],
        config: &SnapshotConfig,
    ) -> Result<Vec<u8>, EngineError>;

    /// Creates the main instance.
    fn create_main_instance(
        &mut self,
        spec: InstanceSpec<'_>,
    ) -> Result<Box<dyn MainInstance>, EngineError>;
}

/// A cloneable, thread-safe writer shared by the bootstrap and the engine.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedWriter")
    }
}

impl SharedWriter {
    /// Wraps `writer`.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Writer over the process stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Writer over the process stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut inner) => inner.write(buf),
            Err(poisoned) => poisoned.into_inner().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.lock() {
            Ok(mut inner) => inner.flush(),
            Err(poisoned) => poisoned.into_inner().flush(),
        }
    }
}
