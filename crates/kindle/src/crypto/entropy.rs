//! Shared crypto readiness and the engine's entropy callback.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CryptoError, CryptoProvider};
use crate::fatal;

/// Readiness of the crypto provider, shared between the crypto worker and the
/// entropy callback.
///
/// `ready` only ever goes from `false` to `true`, and only while `lock` is
/// held. The self-test therefore runs at most once no matter which side gets
/// there first.
#[derive(Debug, Default)]
pub struct CryptoState {
    lock: Mutex<()>,
    ready: AtomicBool,
    self_tests: AtomicUsize,
}

impl CryptoState {
    /// Creates an unready state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the self-test has passed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of self-tests run so far.
    #[must_use]
    pub fn self_test_count(&self) -> usize {
        self.self_tests.load(Ordering::Acquire)
    }

    /// Takes the crypto lock. Poisoning is ignored since the guarded data is
    /// `()`.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Runs the self-test unless it has already passed. The caller must hold
    /// the guard returned by [`CryptoState::lock`].
    ///
    /// A failing self-test aborts the process.
    pub(crate) fn self_test_locked(
        &self,
        _held: &MutexGuard<'_, ()>,
        provider: &dyn CryptoProvider,
        bytes: usize,
    ) {
        if self.ready.load(Ordering::Acquire) {
            return;
        }
        self.self_tests.fetch_add(1, Ordering::AcqRel);
        let mut probe = vec![0_u8; bytes.max(1)];
        if !provider.secure_random(&mut probe) {
            fatal::abort("crypto", &CryptoError::SelfTest);
        }
        self.ready.store(true, Ordering::Release);
    }

    /// Double-checked readiness: the lock is taken only until the first
    /// self-test has passed.
    pub fn ensure_ready(&self, provider: &dyn CryptoProvider, bytes: usize) {
        if self.is_ready() {
            return;
        }
        let held = self.lock();
        self.self_test_locked(&held, provider, bytes);
    }
}

/// Random byte source registered with the engine.
#[derive(Clone)]
pub struct EntropySource {
    state: Arc<CryptoState>,
    provider: Arc<dyn CryptoProvider>,
}

impl std::fmt::Debug for EntropySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropySource")
            .field("ready", &self.state.is_ready())
            .finish_non_exhaustive()
    }
}

impl EntropySource {
    /// Builds a source over the shared state.
    #[must_use]
    pub fn new(state: Arc<CryptoState>, provider: Arc<dyn CryptoProvider>) -> Self {
        Self { state, provider }
    }

    /// Fills `buf`, running the self-test first if nobody has yet.
    ///
    /// Returns `false` if the provider could not supply bytes.
    pub fn fill(&self, buf: &mut [u8]) -> bool {
        self.state
            .ensure_ready(self.provider.as_ref(), super::config::DEFAULT_SELF_TEST_BYTES);
        self.provider.secure_random(buf)
    }
}
