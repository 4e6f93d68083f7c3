//! One-time operating system setup run on the platform worker.
//!
//! Covers descriptor inheritance, repair and recording of descriptors 0 to
//! 2, inherited signal dispositions, exit and trap handlers, and the open
//! file limit. Only [`reset_stdio`] is safe to call from a signal handler.

mod limits;
mod signals;
mod stdio;

use std::os::fd::RawFd;

use libc::{c_int, c_void, siginfo_t};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::debug;

use crate::flags::ProcessFlags;

pub use limits::{Limit, OPEN_FILE_CEILING, ResourceLimits, SystemLimits, raise_open_file_limit};
pub use signals::{SignalHandler, register_signal_handler};
pub use stdio::{StdioRecord, reset_stdio, restore};

pub(crate) const PLATFORM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::platform");

/// Engine hook offered a segmentation fault before any chained handler.
/// Returns `true` if the fault was handled and execution may resume.
pub type TrapHook = fn(c_int, *mut siginfo_t, *mut c_void) -> bool;

/// Failures that leave the process image unusable.
#[derive(Debug, Error)]
pub enum PlatformFault {
    /// A standard descriptor is broken and could not be replaced.
    #[error("descriptor {fd} is unusable and could not be repaired: {source}")]
    StdioUnrepairable {
        /// Descriptor number.
        fd: RawFd,
        /// Underlying failure.
        #[source]
        source: Errno,
    },
    /// The state of a standard descriptor could not be read.
    #[error("cannot record the state of descriptor {fd}: {source}")]
    StdioState {
        /// Descriptor number.
        fd: RawFd,
        /// Underlying failure.
        #[source]
        source: Errno,
    },
    /// A signal disposition could not be changed.
    #[error("cannot install a handler for {signal}: {source}")]
    SignalInstall {
        /// Signal being changed.
        signal: Signal,
        /// Underlying failure.
        #[source]
        source: Errno,
    },
    /// A trap signal handler asked to be reset after one delivery.
    #[error("handlers for {signal} are chained behind the trap handler and cannot reset")]
    TrapSignalReset {
        /// Signal being registered.
        signal: Signal,
    },
}

/// What platform initialisation changed, used again during teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformHandle {
    /// Descriptors 0 to 2 were recorded for restoration.
    pub stdio_recorded: bool,
    /// Dispositions were reset and exit handlers installed.
    pub signals_installed: bool,
    /// The trap handler is active.
    pub trap_installed: bool,
    /// Open file soft limit after adjustment.
    pub open_file_limit: Option<u64>,
    /// Descriptors marked close-on-exec.
    pub cloexec_descriptors: usize,
}

/// Runs the steps enabled in `flags`.
///
/// Resource-limit failures are ignored. Everything else is a fault the
/// caller must treat as fatal.
///
/// # Errors
///
/// Returns [`PlatformFault`] when the standard descriptors or signal
/// dispositions cannot be put into a known state.
pub fn initialize(
    flags: &ProcessFlags,
    trap_hook: Option<TrapHook>,
) -> Result<PlatformHandle, PlatformFault> {
    let mut handle = PlatformHandle::default();

    if !flags.stdio_inheritance {
        handle.cloexec_descriptors = stdio::disable_inheritance();
    }
    if flags.stdio_initialization {
        signals::reset_stdio_at_exit();
        stdio::repair_standard_fds()?;
    }
    if flags.default_signal_handling {
        signals::reset_signal_dispositions()?;
    }
    if flags.stdio_initialization {
        handle.stdio_recorded = stdio::record_standard_fds()?;
    }
    if flags.default_signal_handling {
        signals::install_exit_handlers()?;
        handle.signals_installed = true;
        if let Some(hook) = trap_hook {
            signals::install_trap_handler(hook)?;
            handle.trap_installed = true;
        }
    }
    if flags.adjust_resource_limits {
        handle.open_file_limit = raise_open_file_limit(&mut SystemLimits);
    }

    debug!(
        target: PLATFORM_TARGET,
        stdio_recorded = handle.stdio_recorded,
        signals_installed = handle.signals_installed,
        trap_installed = handle.trap_installed,
        open_file_limit = handle.open_file_limit,
        cloexec = handle.cloexec_descriptors,
        "platform initialised"
    );
    Ok(handle)
}

/// Reverses [`initialize`]: restores the standard descriptors and, if they
/// were changed, the signal dispositions.
///
/// # Errors
///
/// Returns [`PlatformFault::SignalInstall`] if a disposition cannot be
/// reset.
pub fn teardown(handle: &PlatformHandle) -> Result<usize, PlatformFault> {
    let restored = reset_stdio();
    if handle.signals_installed {
        signals::reset_signal_dispositions()?;
        signals::forget_trap_handler();
    }
    Ok(restored)
}
