//! Standard descriptor repair, recording and restoration.

use std::mem::MaybeUninit;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::OnceLock;

use libc::{c_int, termios};
use nix::errno::Errno;

use super::PlatformFault;

const STANDARD_FDS: [RawFd; 3] = [0, 1, 2];
const FIRST_INHERITABLE: RawFd = 3;
const INVALID_RUN_LIMIT: usize = 16;

static RECORDED: OnceLock<[StdioRecord; 3]> = OnceLock::new();

/// State of a descriptor captured at startup.
#[derive(Clone, Copy)]
pub struct StdioRecord {
    fd: RawFd,
    dev: libc::dev_t,
    ino: libc::ino_t,
    flags: c_int,
    termios: Option<termios>,
}

impl std::fmt::Debug for StdioRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioRecord")
            .field("fd", &self.fd)
            .field("dev", &self.dev)
            .field("ino", &self.ino)
            .field("flags", &self.flags)
            .field("tty", &self.termios.is_some())
            .finish()
    }
}

impl StdioRecord {
    /// Captures identity, status flags and terminal attributes of `fd`.
    ///
    /// # Errors
    ///
    /// Returns the `errno` of the failing call.
    pub fn capture(fd: RawFd) -> Result<Self, Errno> {
        let stat = fstat(fd)?;
        let flags = get_status_flags(fd)?;
        let termios = if unsafe { libc::isatty(fd) } == 1 {
            let mut attrs = MaybeUninit::<termios>::uninit();
            Errno::result(unsafe { libc::tcgetattr(fd, attrs.as_mut_ptr()) })?;
            Some(unsafe { attrs.assume_init() })
        } else {
            None
        };
        Ok(Self {
            fd,
            dev: stat.st_dev,
            ino: stat.st_ino,
            flags,
            termios,
        })
    }

    /// Descriptor number.
    #[must_use]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    /// Returns `true` if the descriptor was a terminal.
    #[must_use]
    pub const fn is_tty(&self) -> bool {
        self.termios.is_some()
    }
}

fn fstat(fd: RawFd) -> Result<libc::stat, Errno> {
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    Errno::result(unsafe { libc::fstat(fd, stat.as_mut_ptr()) })?;
    Ok(unsafe { stat.assume_init() })
}

fn get_status_flags(fd: RawFd) -> Result<c_int, Errno> {
    loop {
        match Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) }) {
            Err(Errno::EINTR) => {}
            other => return other,
        }
    }
}

/// Replaces closed standard descriptors with `/dev/null`.
pub(super) fn repair_standard_fds() -> Result<(), PlatformFault> {
    for fd in STANDARD_FDS {
        match fstat(fd) {
            Ok(_) => continue,
            Err(Errno::EBADF) => {}
            Err(source) => return Err(PlatformFault::StdioUnrepairable { fd, source }),
        }
        let opened = Errno::result(unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) })
            .map_err(|source| PlatformFault::StdioUnrepairable { fd, source })?;
        if opened != fd {
            let duplicated = Errno::result(unsafe { libc::dup2(opened, fd) });
            unsafe { libc::close(opened) };
            duplicated.map_err(|source| PlatformFault::StdioUnrepairable { fd, source })?;
        }
    }
    Ok(())
}

/// Records descriptors 0 to 2. Returns `false` if they were already
/// recorded by an earlier run.
pub(super) fn record_standard_fds() -> Result<bool, PlatformFault> {
    let capture =
        |fd| StdioRecord::capture(fd).map_err(|source| PlatformFault::StdioState { fd, source });
    let records = [capture(0)?, capture(1)?, capture(2)?];
    Ok(RECORDED.set(records).is_ok())
}

/// Marks every open descriptor from 3 upward close-on-exec. Stops after a
/// run of 16 invalid descriptors. Returns how many were marked.
pub(super) fn disable_inheritance() -> usize {
    let mut marked = 0;
    let mut invalid_run = 0;
    let mut fd = FIRST_INHERITABLE;
    while invalid_run < INVALID_RUN_LIMIT {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags == -1 {
            invalid_run += 1;
        } else {
            invalid_run = 0;
            if flags & libc::FD_CLOEXEC == 0
                && unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } != -1
            {
                marked += 1;
            }
        }
        fd += 1;
    }
    marked
}

/// `atexit` entry point for [`reset_stdio`].
pub(super) extern "C" fn reset_stdio_hook() {
    reset_stdio();
}

/// Restores the descriptors recorded at startup, if any. Safe to call from
/// a signal handler. Returns how many records still matched their file.
pub fn reset_stdio() -> usize {
    RECORDED.get().map_or(0, |records| restore(records))
}

/// Restores `O_NONBLOCK` and terminal attributes for each record whose
/// descriptor still refers to the same file (device and inode). Returns how
/// many records matched.
///
/// Only the `O_NONBLOCK` bit of the saved status flags is written back.
/// Other status bits, such as `O_APPEND`, keep their current values.
pub fn restore(records: &[StdioRecord]) -> usize {
    let mut matched = 0;
    for record in records {
        let Ok(stat) = fstat(record.fd) else {
            continue;
        };
        if stat.st_dev != record.dev || stat.st_ino != record.ino {
            continue;
        }
        matched += 1;
        restore_nonblocking(record);
        if let Some(attrs) = record.termios.as_ref() {
            restore_terminal(record.fd, attrs);
        }
    }
    matched
}

fn restore_nonblocking(record: &StdioRecord) {
    let Ok(current) = get_status_flags(record.fd) else {
        return;
    };
    let wanted = record.flags & libc::O_NONBLOCK;
    if current & libc::O_NONBLOCK == wanted {
        return;
    }
    let flags = (current & !libc::O_NONBLOCK) | wanted;
    loop {
        let result = unsafe { libc::fcntl(record.fd, libc::F_SETFL, flags) };
        if result != -1 || Errno::last() != Errno::EINTR {
            break;
        }
    }
}

/// `tcsetattr` from a background process group raises `SIGTTOU`, which
/// would stop the process on its way out. Block it for the duration.
fn restore_terminal(fd: RawFd, attrs: &termios) {
    unsafe {
        let mut block = MaybeUninit::<libc::sigset_t>::uninit();
        let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(block.as_mut_ptr());
        libc::sigaddset(block.as_mut_ptr(), libc::SIGTTOU);
        let blocked =
            libc::pthread_sigmask(libc::SIG_BLOCK, block.as_ptr(), previous.as_mut_ptr()) == 0;
        loop {
            let result = libc::tcsetattr(fd, libc::TCSANOW, ptr::from_ref(attrs));
            // EPERM: we lost the controlling terminal; nothing to restore.
            if result == 0 || Errno::last() != Errno::EINTR {
                break;
            }
        }
        if blocked {
            libc::pthread_sigmask(libc::SIG_SETMASK, previous.as_ptr(), ptr::null_mut());
        }
    }
}
