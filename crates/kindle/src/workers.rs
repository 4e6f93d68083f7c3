//! The platform and crypto background workers.

use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::crypto::{self, CryptoError, CryptoOutcome, CryptoProvider, CryptoSettings, CryptoState};
use crate::fatal;
use crate::flags::ProcessFlags;
use crate::platform::{self, PlatformFault, PlatformHandle, TrapHook};

const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::workers");

type PlatformResult = Result<PlatformHandle, PlatformFault>;
type CryptoResult = Result<CryptoOutcome, CryptoError>;

/// What the workers produced. `None` means the worker was not started.
#[derive(Debug)]
pub struct WorkerResults {
    /// Platform initialisation outcome.
    pub platform: Option<PlatformResult>,
    /// Crypto initialisation outcome.
    pub crypto: Option<CryptoResult>,
}

/// Handles to the running workers.
///
/// Dropping the handles joins both threads, so no worker outlives the
/// bootstrap even on a path that never calls [`Workers::join`].
#[derive(Debug)]
pub struct Workers {
    settings: Option<Sender<CryptoSettings>>,
    platform: Option<JoinHandle<PlatformResult>>,
    crypto: Option<JoinHandle<CryptoResult>>,
}

fn spawn<T: Send + 'static>(name: &str, body: impl FnOnce() -> T + Send + 'static) -> JoinHandle<T> {
    match thread::Builder::new().name(name.to_owned()).spawn(body) {
        Ok(handle) => handle,
        Err(error) => fatal::abort("worker launch", &error),
    }
}

fn wait<T>(name: &str, handle: JoinHandle<T>) -> T {
    match handle.join() {
        Ok(result) => result,
        Err(_) => fatal::abort("worker join", &format_args!("{name} worker panicked")),
    }
}

impl Workers {
    /// Starts the workers enabled by `flags`.
    ///
    /// The crypto worker blocks until [`Workers::send_crypto_settings`] is
    /// called, or finishes as skipped once the sender is dropped.
    pub fn launch(
        flags: &ProcessFlags,
        trap_hook: Option<TrapHook>,
        state: &Arc<CryptoState>,
        provider: &Arc<dyn CryptoProvider>,
    ) -> Self {
        let platform = flags.touches_platform().then(|| {
            let flags = *flags;
            spawn("kindle-platform", move || platform::initialize(&flags, trap_hook))
        });

        let (settings, crypto) = if flags.crypto_initialization {
            let (sender, receiver) = mpsc::channel::<CryptoSettings>();
            let state = Arc::clone(state);
            let provider = Arc::clone(provider);
            let handle = spawn("kindle-crypto", move || {
                crypto::run_worker(&receiver, &state, provider.as_ref())
            });
            (Some(sender), Some(handle))
        } else {
            (None, None)
        };

        debug!(
            target: WORKER_TARGET,
            platform = platform.is_some(),
            crypto = crypto.is_some(),
            "workers launched"
        );
        Self {
            settings,
            platform,
            crypto,
        }
    }

    /// Hands the resolved settings to the crypto worker. Later calls do
    /// nothing.
    pub fn send_crypto_settings(&mut self, settings: CryptoSettings) {
        if let Some(sender) = self.settings.take() {
            // A closed channel means the worker already finished.
            sender.send(settings).ok();
        }
    }

    /// Waits for both workers. A worker that panicked aborts the process.
    pub fn join(mut self) -> WorkerResults {
        self.join_inner()
    }

    fn join_inner(&mut self) -> WorkerResults {
        drop(self.settings.take());
        WorkerResults {
            platform: self.platform.take().map(|handle| wait("platform", handle)),
            crypto: self.crypto.take().map(|handle| wait("crypto", handle)),
        }
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        if self.platform.is_some() || self.crypto.is_some() {
            self.join_inner();
        }
    }
}
