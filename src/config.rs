//! Environment-driven configuration.
//!
//! - `SYSMUTEX_DIR`: directory holding lock files (default: the OS temp directory)
//! - `SYSMUTEX_TIMEOUT_SECS`: default timeout for timed acquisition (default: 20)
//! - `SYSMUTEX_POLL_MS`: default sleep between acquisition attempts (default: 150)
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Directory shared by every process that uses the same mutex names.
pub fn lock_dir() -> PathBuf {
    env::var("SYSMUTEX_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

pub fn timeout_from_env() -> Duration {
    env_u64("SYSMUTEX_TIMEOUT_SECS")
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// Zero is rejected so a misconfigured environment cannot turn the poll loop into a busy spin.
pub fn poll_interval_from_env() -> Duration {
    env_u64("SYSMUTEX_POLL_MS")
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}
