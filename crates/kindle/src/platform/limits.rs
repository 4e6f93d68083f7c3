//! Best-effort raise of the open file descriptor limit.

use std::mem::MaybeUninit;

use nix::errno::Errno;
use tracing::debug;

use super::PLATFORM_TARGET;

/// Upper bound searched when the hard limit is unlimited.
pub const OPEN_FILE_CEILING: u64 = 1 << 20;

/// A soft and hard limit pair. `hard` is `None` when unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    /// Current soft limit.
    pub soft: u64,
    /// Hard limit, or `None` for unlimited.
    pub hard: Option<u64>,
}

/// Access to `RLIMIT_NOFILE`.
pub trait ResourceLimits {
    /// Reads the current limit.
    ///
    /// # Errors
    ///
    /// Returns the `errno` reported by the system.
    fn get(&self) -> Result<Limit, Errno>;

    /// Sets the soft limit, keeping the hard limit.
    ///
    /// # Errors
    ///
    /// Returns the `errno` reported by the system.
    fn set(&mut self, limit: Limit) -> Result<(), Errno>;
}

/// The process's own `RLIMIT_NOFILE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLimits;

impl ResourceLimits for SystemLimits {
    fn get(&self) -> Result<Limit, Errno> {
        let mut raw = MaybeUninit::<libc::rlimit>::uninit();
        Errno::result(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, raw.as_mut_ptr()) })?;
        let raw = unsafe { raw.assume_init() };
        Ok(Limit {
            soft: u64::from(raw.rlim_cur),
            hard: (raw.rlim_max != libc::RLIM_INFINITY).then(|| u64::from(raw.rlim_max)),
        })
    }

    fn set(&mut self, limit: Limit) -> Result<(), Errno> {
        let convert = |value: u64| libc::rlim_t::try_from(value).map_err(|_| Errno::EINVAL);
        let raw = libc::rlimit {
            rlim_cur: convert(limit.soft)?,
            rlim_max: limit.hard.map_or(Ok(libc::RLIM_INFINITY), convert)?,
        };
        Errno::result(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &raw) }).map(drop)
    }
}

/// Raises the soft limit as far as the system allows.
///
/// A finite hard limit is set directly. Otherwise the highest accepted
/// value up to [`OPEN_FILE_CEILING`] is found by binary search. Returns the
/// resulting soft limit, or `None` if it could not be read.
pub fn raise_open_file_limit(limits: &mut dyn ResourceLimits) -> Option<u64> {
    let current = limits.get().ok()?;
    if Some(current.soft) == current.hard {
        return Some(current.soft);
    }

    let (mut min, mut max) = match current.hard {
        Some(hard) => (hard, hard),
        None => (current.soft, OPEN_FILE_CEILING),
    };
    if min > max {
        return Some(current.soft);
    }
    loop {
        let candidate = min + (max - min) / 2;
        let attempt = Limit {
            soft: candidate,
            hard: current.hard,
        };
        if limits.set(attempt).is_ok() {
            min = candidate;
        } else {
            max = candidate;
        }
        if min + 1 >= max {
            break;
        }
    }

    let raised = limits.get().map_or(current.soft, |limit| limit.soft);
    debug!(target: PLATFORM_TARGET, from = current.soft, to = raised, "open file limit adjusted");
    Some(raised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Accepts any soft limit up to `accepts`.
    struct FakeLimits {
        limit: Limit,
        accepts: u64,
        attempts: Vec<u64>,
    }

    impl FakeLimits {
        fn new(soft: u64, hard: Option<u64>, accepts: u64) -> Self {
            Self {
                limit: Limit { soft, hard },
                accepts,
                attempts: Vec::new(),
            }
        }
    }

    impl ResourceLimits for FakeLimits {
        fn get(&self) -> Result<Limit, Errno> {
            Ok(self.limit)
        }

        fn set(&mut self, limit: Limit) -> Result<(), Errno> {
            self.attempts.push(limit.soft);
            if limit.soft > self.accepts {
                return Err(Errno::EPERM);
            }
            self.limit = limit;
            Ok(())
        }
    }

    #[rstest]
    fn finite_hard_limit_is_applied_directly() {
        let mut fake = FakeLimits::new(1024, Some(4096), 4096);
        assert_eq!(raise_open_file_limit(&mut fake), Some(4096));
        assert_eq!(fake.attempts, [4096]);
    }

    #[rstest]
    fn unlimited_hard_limit_is_searched() {
        let mut fake = FakeLimits::new(256, None, 10_000);
        assert_eq!(raise_open_file_limit(&mut fake), Some(10_000));
        assert!(fake.attempts.len() < 25, "search should be logarithmic");
    }

    #[rstest]
    fn equal_limits_need_no_change() {
        let mut fake = FakeLimits::new(4096, Some(4096), 4096);
        assert_eq!(raise_open_file_limit(&mut fake), Some(4096));
        assert!(fake.attempts.is_empty());
    }

    #[rstest]
    fn refused_hard_limit_keeps_the_current_soft_limit() {
        let mut fake = FakeLimits::new(1024, Some(4096), 2048);
        assert_eq!(raise_open_file_limit(&mut fake), Some(1024));
    }

    #[rstest]
    fn soft_limit_above_the_ceiling_is_left_alone() {
        let mut fake = FakeLimits::new(OPEN_FILE_CEILING * 2, None, u64::MAX);
        assert_eq!(raise_open_file_limit(&mut fake), Some(OPEN_FILE_CEILING * 2));
        assert!(fake.attempts.is_empty());
    }
}
