//! Termination for unrecoverable bootstrap states.

use std::fmt::Display;
use std::io::{self, Write};

const FATAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::fatal");

/// Logs `detail`, writes one line to stderr and aborts the process.
///
/// Used where continuing would run with a half-initialised process image.
/// Nothing returns a recoverable error after calling this.
pub fn abort(context: &str, detail: &dyn Display) -> ! {
    tracing::error!(
        target: FATAL_TARGET,
        context,
        detail = %detail,
        "unrecoverable bootstrap failure"
    );
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "kindle: fatal error in {context}: {detail}").ok();
    stderr.flush().ok();
    std::process::abort()
}
