//! Signal dispositions, exit handlers and the trap handler chain.

use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use libc::{c_int, c_void, siginfo_t};
use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use super::{PlatformFault, TrapHook, stdio};

/// Highest signal number, exclusive, whose disposition is reset.
const MAX_RESET_SIGNAL: c_int = 32;

static EXIT_RESET: Once = Once::new();

// The trap handler reads these from signal context, so they are plain
// atomics: a hook address, and the chained previous handler plus whether it
// takes `siginfo_t`.
static TRAP_INSTALLED: AtomicBool = AtomicBool::new(false);
static TRAP_HOOK: AtomicUsize = AtomicUsize::new(0);
static PREVIOUS_TRAP_HANDLER: AtomicUsize = AtomicUsize::new(0);
static PREVIOUS_TRAP_SIGINFO: AtomicBool = AtomicBool::new(false);

type InfoHandler = extern "C" fn(c_int, *mut siginfo_t, *mut c_void);
type PlainHandler = extern "C" fn(c_int);

/// A handler registered through [`register_signal_handler`].
#[derive(Debug, Clone, Copy)]
pub enum SignalHandler {
    /// `sa_handler` style.
    Plain(PlainHandler),
    /// `sa_sigaction` style, installed with `SA_SIGINFO`.
    Info(InfoHandler),
}

impl SignalHandler {
    fn address(self) -> usize {
        match self {
            Self::Plain(handler) => handler as usize,
            Self::Info(handler) => handler as usize,
        }
    }
}

const fn is_trap_signal(signal: Signal) -> bool {
    #[cfg(target_os = "macos")]
    if matches!(signal, Signal::SIGBUS) {
        return true;
    }
    matches!(signal, Signal::SIGSEGV)
}

fn install(signal: Signal, action: &SigAction) -> Result<SigAction, PlatformFault> {
    // SAFETY: every handler installed here is async-signal-safe.
    unsafe { sigaction(signal, action) }.map_err(|source| PlatformFault::SignalInstall { signal, source })
}

fn query(signal: c_int) -> Result<libc::sigaction, Errno> {
    let mut old = MaybeUninit::<libc::sigaction>::uninit();
    Errno::result(unsafe { libc::sigaction(signal, ptr::null(), old.as_mut_ptr()) })?;
    Ok(unsafe { old.assume_init() })
}

/// Puts inherited dispositions back to their defaults.
///
/// `SIGPIPE` and `SIGXFSZ` are ignored so writes report errors instead of
/// killing the process. Other signals go back to `SIG_DFL` only when they
/// were inherited as `SIG_IGN` without `SA_SIGINFO`. Any installed handler,
/// plain or `SA_SIGINFO`, set up by an embedder, a profiler or a preloaded
/// library survives.
pub(super) fn reset_signal_dispositions() -> Result<(), PlatformFault> {
    for number in 1..MAX_RESET_SIGNAL {
        let Ok(signal) = Signal::try_from(number) else {
            continue;
        };
        if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        let handler = if matches!(signal, Signal::SIGPIPE | Signal::SIGXFSZ) {
            SigHandler::SigIgn
        } else {
            let old = query(number).map_err(|source| PlatformFault::SignalInstall { signal, source })?;
            if old.sa_flags & libc::SA_SIGINFO != 0 || old.sa_sigaction != libc::SIG_IGN {
                continue;
            }
            SigHandler::SigDfl
        };
        install(signal, &SigAction::new(handler, SaFlags::empty(), SigSet::empty()))?;
    }
    Ok(())
}

extern "C" fn signal_exit(signal: c_int) {
    stdio::reset_stdio();
    // SA_RESETHAND already restored the default action.
    unsafe { libc::raise(signal) };
}

/// Installs one-shot `SIGINT` and `SIGTERM` handlers that restore stdio
/// and re-raise.
pub(super) fn install_exit_handlers() -> Result<(), PlatformFault> {
    let action = SigAction::new(
        SigHandler::Handler(signal_exit),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        install(signal, &action)?;
    }
    Ok(())
}

/// Registers the stdio reset with `atexit`, once per process.
pub(super) fn reset_stdio_at_exit() {
    EXIT_RESET.call_once(|| {
        unsafe { libc::atexit(stdio::reset_stdio_hook) };
    });
}

extern "C" fn trap_handler(signal: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let hook = TRAP_HOOK.load(Ordering::Acquire);
    if hook != 0 {
        // SAFETY: only `install_trap_handler` stores into TRAP_HOOK, and it
        // stores a `TrapHook`.
        let hook: TrapHook = unsafe { mem::transmute::<usize, TrapHook>(hook) };
        if hook(signal, info, context) {
            return;
        }
    }

    let previous = PREVIOUS_TRAP_HANDLER.load(Ordering::Acquire);
    if previous != 0 && previous != libc::SIG_DFL && previous != libc::SIG_IGN {
        // SAFETY: PREVIOUS_TRAP_HANDLER holds a handler address whose kind
        // is recorded in PREVIOUS_TRAP_SIGINFO.
        if PREVIOUS_TRAP_SIGINFO.load(Ordering::Acquire) {
            let handler = unsafe { mem::transmute::<usize, InfoHandler>(previous) };
            handler(signal, info, context);
        } else {
            let handler = unsafe { mem::transmute::<usize, PlainHandler>(previous) };
            handler(signal);
        }
        return;
    }

    // Nobody wants it: fall back to the default action and crash.
    unsafe {
        let mut action = MaybeUninit::<libc::sigaction>::zeroed().assume_init();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigaction(signal, &action, ptr::null_mut());
    }
    stdio::reset_stdio();
    unsafe { libc::raise(signal) };
}

fn trap_signals() -> &'static [Signal] {
    #[cfg(target_os = "macos")]
    {
        &[Signal::SIGSEGV, Signal::SIGBUS]
    }
    #[cfg(not(target_os = "macos"))]
    {
        &[Signal::SIGSEGV]
    }
}

/// Installs the trap handler, chaining to whatever was there before.
pub(super) fn install_trap_handler(hook: TrapHook) -> Result<(), PlatformFault> {
    TRAP_HOOK.store(hook as usize, Ordering::Release);
    let action = SigAction::new(
        SigHandler::SigAction(trap_handler),
        SaFlags::SA_SIGINFO,
        SigSet::empty(),
    );
    for &signal in trap_signals() {
        let previous = install(signal, &action)?;
        store_previous(previous.handler());
    }
    TRAP_INSTALLED.store(true, Ordering::Release);
    Ok(())
}

/// Stops routing trap signals through the engine hook.
pub(super) fn forget_trap_handler() {
    TRAP_INSTALLED.store(false, Ordering::Release);
    TRAP_HOOK.store(0, Ordering::Release);
}

fn store_previous(handler: SigHandler) {
    let (address, info) = match handler {
        SigHandler::SigDfl => (libc::SIG_DFL, false),
        SigHandler::SigIgn => (libc::SIG_IGN, false),
        SigHandler::Handler(handler) => (handler as usize, false),
        SigHandler::SigAction(handler) => (handler as usize, true),
    };
    PREVIOUS_TRAP_SIGINFO.store(info, Ordering::Release);
    PREVIOUS_TRAP_HANDLER.store(address, Ordering::Release);
}

/// Installs `handler` for `signal`, for embedders that share the process.
///
/// While the trap handler is active, handlers for trap signals are not
/// installed. They become the handler the trap handler chains to, and
/// `reset` must be `false`.
///
/// # Errors
///
/// Returns [`PlatformFault::TrapSignalReset`] for a resetting trap-signal
/// handler, or [`PlatformFault::SignalInstall`] if `sigaction` fails.
pub fn register_signal_handler(
    signal: Signal,
    handler: SignalHandler,
    reset: bool,
) -> Result<(), PlatformFault> {
    if TRAP_INSTALLED.load(Ordering::Acquire) && is_trap_signal(signal) {
        if reset {
            return Err(PlatformFault::TrapSignalReset { signal });
        }
        PREVIOUS_TRAP_SIGINFO.store(matches!(handler, SignalHandler::Info(_)), Ordering::Release);
        PREVIOUS_TRAP_HANDLER.store(handler.address(), Ordering::Release);
        return Ok(());
    }

    let (sig_handler, mut flags) = match handler {
        SignalHandler::Plain(handler) => (SigHandler::Handler(handler), SaFlags::empty()),
        SignalHandler::Info(handler) => (SigHandler::SigAction(handler), SaFlags::SA_SIGINFO),
    };
    if reset {
        flags |= SaFlags::SA_RESETHAND;
    }
    install(signal, &SigAction::new(sig_handler, flags, SigSet::empty()))?;
    Ok(())
}
