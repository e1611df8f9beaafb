//! Error mapping guide:
//! - `MutexError` is the library-facing error for timed acquisition and name validation.
//! - Constructors of `SystemMutex` report fatal I/O as `io::Error`; contention is not an error.
//! - Exit codes for the CLI: InvalidName 2, Timeout 3, NotReentrant 4, I/O NotFound 127, other I/O 1.
use std::io;
use std::time::Duration;

/// Errors surfaced by name validation and timed acquisition.
#[derive(Debug, thiserror::Error)]
pub enum MutexError {
    /// The name contains characters that cannot appear in a lock file name.
    #[error("Mutex name is invalid: {0:?}")]
    InvalidName(String),
    /// The name is already held by a timed guard in this process.
    #[error("Mutex {0:?} is already held by this process: not a reentrant mutex")]
    NotReentrant(String),
    #[error("Acquiring mutex {name:?} timed out after {:.2}s", .elapsed.as_secs_f64())]
    Timeout { name: String, elapsed: Duration },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Map an io::Error to a process exit code:
/// - 127 for NotFound
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Convert MutexError to a process exit code (I/O variants share the io::Error mapping).
pub fn exit_code_for_mutex_error(e: &MutexError) -> u8 {
    match e {
        MutexError::InvalidName(_) => 2,
        MutexError::Timeout { .. } => 3,
        MutexError::NotReentrant(_) => 4,
        MutexError::Io(ioe) => exit_code_for_io_error(ioe),
    }
}
