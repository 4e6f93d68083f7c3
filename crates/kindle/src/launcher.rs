//! Runs the bootstrap, the main instance and teardown for the binary.

use std::io::Write;

use tracing::warn;

use kindle_config::PROGRAM_NAME;

use crate::bootstrap::{Bootstrap, Collaborators};
use crate::engine::SharedWriter;
use crate::exit_code::ExitCode;
use crate::flags::ProcessFlags;
use crate::guard::PROCESS_GUARD;

const LAUNCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");

/// Entry point for the `kindle` binary.
#[must_use]
pub fn start(args: Vec<String>, stdout: SharedWriter, stderr: SharedWriter) -> std::process::ExitCode {
    let collaborators = Collaborators::system(stdout, stderr.clone());
    let bootstrap = Bootstrap::new(&PROCESS_GUARD, collaborators);
    run(bootstrap, args, ProcessFlags::default(), stderr).into()
}

/// Initialises, prints every error as `<argv0>: <error>`, runs the main
/// instance unless the bootstrap stopped early, and tears down.
pub fn run(
    bootstrap: Bootstrap<'_>,
    args: Vec<String>,
    flags: ProcessFlags,
    mut stderr: SharedWriter,
) -> ExitCode {
    let program = args.first().cloned().unwrap_or_else(|| PROGRAM_NAME.to_owned());
    let mut result = bootstrap.initialize(args, flags);
    for error in result.errors() {
        writeln!(stderr, "{program}: {error}").ok();
    }
    stderr.flush().ok();

    let code = if result.early_return() {
        result.exit_code()
    } else {
        match result.take_main_instance() {
            Some(mut instance) => instance.run(),
            None => ExitCode::Success,
        }
    };

    let report = result.teardown();
    for failure in report.failures() {
        warn!(target: LAUNCHER_TARGET, failure = %failure, "teardown step failed");
    }
    code
}
