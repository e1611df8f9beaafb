//! Timeout-bounded acquisition of a [`SystemMutex`] with process-local reentrancy detection.
//!
//! Waiting is an explicit poll loop: each round makes one non-blocking attempt and
//! sleeps between rounds. There is no waiter queue; any contender may win a round.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::config;
use crate::errors::MutexError;
use crate::mutex::{lock_path_in, SystemMutex};
use crate::name::check_valid_mutex_name;

// Lock files held through timed guards in this process, with a holder count per path.
// Keyed by path so the same name in two lock directories counts as two mutexes.
static HELD_PATHS: Lazy<Mutex<HashMap<PathBuf, usize>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn held_paths() -> MutexGuard<'static, HashMap<PathBuf, usize>> {
    // The map stays consistent across a panic in another holder; keep using it.
    HELD_PATHS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn register_held(path: &Path) {
    *held_paths().entry(path.to_path_buf()).or_insert(0) += 1;
}

fn unregister_held(path: &Path) {
    let mut held = held_paths();
    if let Some(count) = held.get_mut(path) {
        *count -= 1;
        if *count == 0 {
            held.remove(path);
        }
    }
}

fn is_path_held_locally(path: &Path) -> bool {
    held_paths().contains_key(path)
}

/// Whether a timed guard for `name` in `dir` is alive anywhere in this process.
pub fn is_held_locally(dir: &Path, name: &str) -> bool {
    is_path_held_locally(&lock_path_in(dir, name))
}

/// Options for [`timed_acquire_mutex_with`].
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Fail fast with [`MutexError::NotReentrant`] if this process already holds the name.
    pub check_reentrant: bool,
    /// Directory for lock files; `None` uses the configured lock directory.
    pub lock_dir: Option<PathBuf>,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        AcquireOptions {
            timeout: config::DEFAULT_TIMEOUT,
            poll_interval: config::DEFAULT_POLL_INTERVAL,
            check_reentrant: true,
            lock_dir: None,
        }
    }
}

impl AcquireOptions {
    /// Defaults with `SYSMUTEX_TIMEOUT_SECS` and `SYSMUTEX_POLL_MS` applied.
    pub fn from_env() -> Self {
        AcquireOptions {
            timeout: config::timeout_from_env(),
            poll_interval: config::poll_interval_from_env(),
            ..AcquireOptions::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_check_reentrant(mut self, check_reentrant: bool) -> Self {
        self.check_reentrant = check_reentrant;
        self
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    fn resolved_lock_dir(&self) -> PathBuf {
        self.lock_dir.clone().unwrap_or_else(config::lock_dir)
    }
}

/// Scoped hold on a system mutex obtained by [`timed_acquire_mutex`].
///
/// Dropping the guard releases the lock file first and then forgets its path
/// in the reentrancy registry, also when unwinding.
#[derive(Debug)]
pub struct TimedMutexGuard {
    mutex: SystemMutex,
}

impl TimedMutexGuard {
    pub fn name(&self) -> &str {
        self.mutex.name()
    }

    pub fn path(&self) -> &Path {
        self.mutex.path()
    }
}

impl Drop for TimedMutexGuard {
    fn drop(&mut self) {
        self.mutex.release_mutex();
        unregister_held(self.mutex.path());
    }
}

/// Acquire `name` with options from the environment (20s timeout by default).
pub fn timed_acquire_mutex(name: &str) -> Result<TimedMutexGuard, MutexError> {
    timed_acquire_mutex_with(name, &AcquireOptions::from_env())
}

/// Acquire `name`, polling until it is free or `options.timeout` has elapsed.
#[instrument(
    level = "debug",
    skip(name, options),
    fields(mutex = name, timeout_ms = options.timeout.as_millis() as u64)
)]
pub fn timed_acquire_mutex_with(
    name: &str,
    options: &AcquireOptions,
) -> Result<TimedMutexGuard, MutexError> {
    check_valid_mutex_name(name)?;
    let dir = options.resolved_lock_dir();
    if options.check_reentrant && is_held_locally(&dir, name) {
        return Err(MutexError::NotReentrant(name.to_string()));
    }

    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let mutex = SystemMutex::new_in(&dir, name)?;
        if mutex.get_mutex_acquired() {
            register_held(mutex.path());
            debug!(
                attempts,
                waited_ms = started.elapsed().as_millis() as u64,
                "timed acquisition succeeded"
            );
            return Ok(TimedMutexGuard { mutex });
        }
        drop(mutex);

        let elapsed = started.elapsed();
        if elapsed > options.timeout {
            warn!(attempts, elapsed_ms = elapsed.as_millis() as u64, "timed acquisition gave up");
            return Err(MutexError::Timeout {
                name: name.to_string(),
                elapsed,
            });
        }
        thread::sleep(options.poll_interval);
    }
}

/// Run `f` while holding `name`; the mutex is released however `f` exits.
pub fn with_timed_mutex<T, F>(name: &str, options: &AcquireOptions, f: F) -> Result<T, MutexError>
where
    F: FnOnce() -> T,
{
    let _guard = timed_acquire_mutex_with(name, options)?;
    Ok(f())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(dir: &Path) -> AcquireOptions {
        AcquireOptions::default()
            .with_lock_dir(dir)
            .with_timeout(Duration::from_millis(400))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_guard_registers_and_unregisters() {
        let td = tempfile::tempdir().expect("tmpdir");
        let name = "timed_registry_unit";
        {
            let guard = timed_acquire_mutex_with(name, &opts(td.path())).expect("acquire");
            assert_eq!(guard.name(), name);
            assert!(guard.path().exists());
            assert!(is_held_locally(td.path(), name));
        }
        assert!(!is_held_locally(td.path(), name));
    }

    #[test]
    fn test_reentrant_acquire_fails_fast() {
        let td = tempfile::tempdir().expect("tmpdir");
        let name = "timed_reentrant_unit";
        let o = opts(td.path()).with_timeout(Duration::from_secs(30));
        let _outer = timed_acquire_mutex_with(name, &o).expect("outer");
        let started = Instant::now();
        let err = timed_acquire_mutex_with(name, &o).expect_err("inner must fail");
        assert!(matches!(err, MutexError::NotReentrant(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_reports_elapsed_beyond_budget() {
        let td = tempfile::tempdir().expect("tmpdir");
        let name = "timed_timeout_unit";
        let _holder = SystemMutex::new_in(td.path(), name).expect("holder");
        let o = opts(td.path());
        match timed_acquire_mutex_with(name, &o) {
            Err(MutexError::Timeout { name: n, elapsed }) => {
                assert_eq!(n, name);
                assert!(elapsed > o.timeout, "elapsed {elapsed:?}");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(!is_held_locally(td.path(), name));
    }

    #[test]
    fn test_invalid_name_is_an_error_not_a_retry() {
        let td = tempfile::tempdir().expect("tmpdir");
        let err = timed_acquire_mutex_with("bad:name", &opts(td.path())).expect_err("invalid");
        assert!(matches!(err, MutexError::InvalidName(_)));
    }

    #[test]
    fn test_unregister_keeps_other_holders() {
        let td = tempfile::tempdir().expect("tmpdir");
        let path = lock_path_in(td.path(), "timed_count_unit");
        register_held(&path);
        register_held(&path);
        unregister_held(&path);
        assert!(is_held_locally(td.path(), "timed_count_unit"));
        unregister_held(&path);
        assert!(!is_held_locally(td.path(), "timed_count_unit"));
        unregister_held(&path);
        assert!(!is_held_locally(td.path(), "timed_count_unit"));
    }

    #[test]
    fn test_same_name_in_other_lock_dir_is_not_reentrant() {
        let dir_a = tempfile::tempdir().expect("tmpdir a");
        let dir_b = tempfile::tempdir().expect("tmpdir b");
        let name = "timed_same_name_two_dirs";
        let guard_a = timed_acquire_mutex_with(name, &opts(dir_a.path())).expect("acquire in a");
        assert!(is_held_locally(dir_a.path(), name));
        assert!(!is_held_locally(dir_b.path(), name));

        let guard_b = timed_acquire_mutex_with(name, &opts(dir_b.path()))
            .expect("a different lock directory is a different mutex");
        assert_ne!(guard_a.path(), guard_b.path());

        // Reentry in the original directory is still refused
        let err = timed_acquire_mutex_with(name, &opts(dir_a.path())).expect_err("reentry");
        assert!(matches!(err, MutexError::NotReentrant(_)), "{err:?}");
        drop(guard_b);
        assert!(!is_held_locally(dir_b.path(), name));
        assert!(is_held_locally(dir_a.path(), name));
    }

    #[test]
    fn test_with_timed_mutex_releases_after_panic() {
        let td = tempfile::tempdir().expect("tmpdir");
        let name = "timed_panic_unit";
        let o = opts(td.path());
        let result = std::panic::catch_unwind(|| {
            with_timed_mutex(name, &o, || panic!("boom inside scope"))
        });
        assert!(result.is_err());
        assert!(!is_held_locally(td.path(), name));
        let value = with_timed_mutex(name, &o, || 41 + 1).expect("reacquire after panic");
        assert_eq!(value, 42);
    }
}
