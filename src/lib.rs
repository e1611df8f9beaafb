//! Named mutual exclusion across threads and processes on one machine.
//!
//! A [`SystemMutex`] is an exclusive OS lock on `<lock dir>/<name>.lock`. The
//! kernel drops the lock when its holder exits, so a crashed process never
//! leaves a name locked forever; the file records the holder's pid for
//! diagnostics ([`read_lock_owner`]).
//!
//! [`timed_acquire_mutex`] wraps the single-shot attempt in a poll loop with a
//! timeout and returns a guard that releases on drop. Within one process it
//! refuses to acquire a name it already holds instead of deadlocking.
//!
//! ```no_run
//! use std::time::Duration;
//! use system_mutex::{generate_mutex_name, timed_acquire_mutex_with, AcquireOptions};
//!
//! let name = generate_mutex_name("/srv/data/index", "index_");
//! let opts = AcquireOptions::default().with_timeout(Duration::from_secs(5));
//! let _guard = timed_acquire_mutex_with(&name, &opts)?;
//! // exclusive section
//! # Ok::<(), system_mutex::MutexError>(())
//! ```

pub mod config;
pub mod errors;
pub mod mutex;
pub mod name;
pub mod process;
pub mod telemetry;
pub mod timed;

pub use config::lock_dir;
pub use errors::{exit_code_for_io_error, exit_code_for_mutex_error, MutexError};
pub use mutex::{lock_path_in, read_lock_owner, LockOwner, SystemMutex};
pub use name::{check_valid_mutex_name, generate_mutex_name};
pub use process::{current_pid, is_process_alive};
pub use telemetry::telemetry_init;
pub use timed::{
    is_held_locally, timed_acquire_mutex, timed_acquire_mutex_with, with_timed_mutex,
    AcquireOptions, TimedMutexGuard,
};
