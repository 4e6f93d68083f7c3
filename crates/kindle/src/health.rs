//! Structured reporting of bootstrap lifecycle events.

use std::fmt;
use std::sync::Arc;

use crate::exit_code::ExitCode;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// States of the bootstrap sequence, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootstrapPhase {
    /// Entry; the guard has been claimed.
    Created,
    /// Debug logging variables have been read.
    DebugConfigParsed,
    /// Platform and crypto workers are running.
    WorkersLaunched,
    /// Options parsed and validated.
    OptionsReady,
    /// The entropy source is registered with the engine.
    EntropyRegistered,
    /// Both workers have finished.
    WorkersJoined,
    /// Informational flags were handled.
    HelpOrVersionHandled,
    /// The engine runtime is initialised.
    EngineInitialized,
    /// A snapshot was chosen, loaded or built.
    SnapshotResolved,
    /// The main instance exists.
    Ready,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::DebugConfigParsed => "debug_config_parsed",
            Self::WorkersLaunched => "workers_launched",
            Self::OptionsReady => "options_ready",
            Self::EntropyRegistered => "entropy_registered",
            Self::WorkersJoined => "workers_joined",
            Self::HelpOrVersionHandled => "help_or_version_handled",
            Self::EngineInitialized => "engine_initialized",
            Self::SnapshotResolved => "snapshot_resolved",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Observer notified as the bootstrap advances.
pub trait BootstrapReporter: Send + Sync {
    /// A phase was entered.
    fn phase_entered(&self, phase: BootstrapPhase);

    /// The sequence stopped early while in `phase`.
    fn early_return(&self, phase: BootstrapPhase, code: ExitCode);

    /// A background worker reported a failure.
    fn worker_failed(&self, worker: &str, message: &str);

    /// The main instance was created.
    fn ready(&self);
}

impl<T> BootstrapReporter for Arc<T>
where
    T: BootstrapReporter,
{
    fn phase_entered(&self, phase: BootstrapPhase) {
        (**self).phase_entered(phase);
    }

    fn early_return(&self, phase: BootstrapPhase, code: ExitCode) {
        (**self).early_return(phase, code);
    }

    fn worker_failed(&self, worker: &str, message: &str) {
        (**self).worker_failed(worker, message);
    }

    fn ready(&self) {
        (**self).ready();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredBootstrapReporter;

impl StructuredBootstrapReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BootstrapReporter for StructuredBootstrapReporter {
    fn phase_entered(&self, phase: BootstrapPhase) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "phase_entered",
            phase = %phase,
            "bootstrap phase entered"
        );
    }

    fn early_return(&self, phase: BootstrapPhase, code: ExitCode) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "early_return",
            phase = %phase,
            exit_code = code.code(),
            "bootstrap returned early"
        );
    }

    fn worker_failed(&self, worker: &str, message: &str) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "worker_failed",
            worker,
            message,
            "bootstrap worker failed"
        );
    }

    fn ready(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "ready",
            "bootstrap completed"
        );
    }
}
