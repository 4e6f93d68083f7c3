//! Process-wide state owned by one bootstrap run.

use std::fmt;
use std::sync::Arc;

use crate::crypto::CryptoState;
use crate::engine::Engine;
use crate::flags::ProcessFlags;
use crate::platform::PlatformHandle;
use crate::validation::SecurityRevert;

/// Which engine subsystems were started and must be stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartedSubsystems {
    /// The embedding platform.
    pub engine_platform: bool,
    /// The garbage collector.
    pub garbage_collector: bool,
    /// The engine runtime.
    pub engine: bool,
}

/// State shared by every bootstrap phase and by teardown.
pub struct ProcessContext {
    flags: ProcessFlags,
    crypto: Arc<CryptoState>,
    platform: Option<PlatformHandle>,
    started: StartedSubsystems,
    security_reverts: Vec<SecurityRevert>,
    engine: Box<dyn Engine>,
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("flags", &self.flags)
            .field("crypto", &self.crypto)
            .field("platform", &self.platform)
            .field("started", &self.started)
            .field("security_reverts", &self.security_reverts)
            .finish_non_exhaustive()
    }
}

impl ProcessContext {
    pub(crate) fn new(flags: ProcessFlags, crypto: Arc<CryptoState>, engine: Box<dyn Engine>) -> Self {
        Self {
            flags,
            crypto,
            platform: None,
            started: StartedSubsystems::default(),
            security_reverts: Vec::new(),
            engine,
        }
    }

    /// Flags fixed at entry.
    #[must_use]
    pub const fn flags(&self) -> &ProcessFlags {
        &self.flags
    }

    /// Crypto readiness shared with the entropy source.
    #[must_use]
    pub fn crypto_state(&self) -> &Arc<CryptoState> {
        &self.crypto
    }

    /// What platform initialisation changed, if it ran.
    #[must_use]
    pub const fn platform(&self) -> Option<&PlatformHandle> {
        self.platform.as_ref()
    }

    /// Engine subsystems currently running.
    #[must_use]
    pub const fn started(&self) -> StartedSubsystems {
        self.started
    }

    /// Security fixes reverted for this process.
    #[must_use]
    pub fn security_reverts(&self) -> &[SecurityRevert] {
        &self.security_reverts
    }

    /// Returns `true` if the revert `id` was applied.
    #[must_use]
    pub fn is_reverted(&self, id: &str) -> bool {
        self.security_reverts.iter().any(|revert| revert.id == id)
    }

    /// The engine collaborator.
    #[must_use]
    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub(crate) fn engine_mut(&mut self) -> &mut dyn Engine {
        self.engine.as_mut()
    }

    pub(crate) fn set_platform(&mut self, handle: PlatformHandle) {
        self.platform = Some(handle);
    }

    pub(crate) fn take_platform(&mut self) -> Option<PlatformHandle> {
        self.platform.take()
    }

    pub(crate) fn started_mut(&mut self) -> &mut StartedSubsystems {
        &mut self.started
    }

    pub(crate) fn set_security_reverts(&mut self, reverts: Vec<SecurityRevert>) {
        self.security_reverts = reverts;
    }
}
