//! Reverse of the bootstrap, run once per result.

use tracing::{debug, warn};

use crate::context::ProcessContext;
use crate::platform;

const TEARDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::teardown");

/// Steps teardown performed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    /// Standard descriptors restored.
    ResetStdio,
    /// Signal dispositions reset.
    ResetSignals,
    /// Garbage collector stopped.
    ShutdownGc,
    /// Engine runtime disposed.
    DisposeEngine,
    /// Embedding platform released.
    DisposePlatform,
}

/// Record of a teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    steps: Vec<TeardownStep>,
    stdio_restored: usize,
    failures: Vec<String>,
}

impl TeardownReport {
    /// Steps performed, in order.
    #[must_use]
    pub fn steps(&self) -> &[TeardownStep] {
        &self.steps
    }

    /// Standard descriptors that still matched their recorded file.
    #[must_use]
    pub const fn stdio_restored(&self) -> usize {
        self.stdio_restored
    }

    /// Problems that did not stop teardown.
    #[must_use]
    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

/// Restores stdio and signals, then stops the collector, the engine and
/// the platform, skipping whatever never started.
pub(crate) fn run(context: &mut ProcessContext) -> TeardownReport {
    let mut report = TeardownReport::default();

    if let Some(handle) = context.take_platform() {
        if handle.stdio_recorded {
            report.steps.push(TeardownStep::ResetStdio);
        }
        if handle.signals_installed {
            report.steps.push(TeardownStep::ResetSignals);
        }
        match platform::teardown(&handle) {
            Ok(restored) => report.stdio_restored = restored,
            Err(error) => {
                warn!(target: TEARDOWN_TARGET, error = %error, "signal reset failed");
                report.failures.push(error.to_string());
            }
        }
    }

    let started = context.started();
    if started.garbage_collector {
        context.engine_mut().shutdown_gc();
        report.steps.push(TeardownStep::ShutdownGc);
    }
    if started.engine {
        context.engine_mut().dispose();
        report.steps.push(TeardownStep::DisposeEngine);
    }
    if started.engine_platform {
        context.engine_mut().dispose_platform();
        report.steps.push(TeardownStep::DisposePlatform);
    }
    *context.started_mut() = Default::default();

    debug!(target: TEARDOWN_TARGET, steps = ?report.steps, "teardown complete");
    report
}
