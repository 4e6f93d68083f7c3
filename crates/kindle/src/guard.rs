//! Detection of repeated bootstrap entry.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::fatal;

/// One-shot latch guarding [`crate::initialize`].
#[derive(Debug, Default)]
pub struct InitGuard {
    claimed: AtomicBool,
}

/// The guard used by [`crate::initialize`].
pub static PROCESS_GUARD: InitGuard = InitGuard::new();

impl InitGuard {
    /// Creates an unclaimed guard.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Claims the guard, aborting the process if it was already claimed.
    pub fn claim(&self) {
        if self.claimed.swap(true, Ordering::AcqRel) {
            fatal::abort(
                "initialize",
                &"bootstrap may only run once per process",
            );
        }
    }

    /// Returns `true` once [`InitGuard::claim`] has been called.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::process::Command;

    const CHILD_ENV: &str = "KINDLE_GUARD_CHILD";

    #[rstest]
    fn first_claim_succeeds() {
        let guard = InitGuard::new();
        assert!(!guard.is_claimed());
        guard.claim();
        assert!(guard.is_claimed());
    }

    /// Claims twice. Only does anything inside the re-executed child.
    #[rstest]
    fn second_claim_in_child() {
        if std::env::var_os(CHILD_ENV).is_none() {
            return;
        }
        let guard = InitGuard::new();
        guard.claim();
        guard.claim();
    }

    #[rstest]
    fn second_claim_aborts_the_process() {
        let exe = std::env::current_exe().expect("test binary path");
        let output = Command::new(exe)
            .args(["--exact", "guard::tests::second_claim_in_child", "--nocapture"])
            .env(CHILD_ENV, "1")
            .output()
            .expect("re-run the test binary");
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            stderr.contains("bootstrap may only run once per process"),
            "stderr: {stderr}"
        );
    }
}
