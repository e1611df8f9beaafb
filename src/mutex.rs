use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::name::check_valid_mutex_name;
use crate::process::{current_pid, is_process_alive};

const LOCK_FILE_SUFFIX: &str = ".lock";

/// Bound on reopen attempts when the lock file is replaced between open and lock.
const OPEN_ATTEMPTS: usize = 3;

/// Process recorded in a lock file, as read without taking the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub alive: bool,
}

/// Named lock shared by all threads and processes on this machine.
///
/// Acquisition is attempted exactly once, when the handle is constructed. Each
/// handle owns its own open file, so two handles in one process contend exactly
/// like two processes do. Dropping an acquired handle releases it.
#[derive(Debug)]
pub struct SystemMutex {
    name: String,
    path: PathBuf,
    held: Option<File>,
    disposed: bool,
}

impl SystemMutex {
    /// Try to acquire `name` in the configured lock directory.
    ///
    /// # Panics
    /// If `name` is not a valid mutex name (see [`check_valid_mutex_name`]).
    pub fn new(name: &str) -> io::Result<Self> {
        Self::new_in(&crate::config::lock_dir(), name)
    }

    /// Try to acquire `name` with its lock file placed in `dir`.
    ///
    /// Contention and transient I/O failures yield a handle that did not acquire;
    /// only permission and unsupported-locking errors are returned.
    ///
    /// # Panics
    /// If `name` is not a valid mutex name.
    #[instrument(level = "debug", skip(dir, name), fields(mutex = name, dir = %dir.display()))]
    pub fn new_in(dir: &Path, name: &str) -> io::Result<Self> {
        if let Err(e) = check_valid_mutex_name(name) {
            panic!("{e}");
        }
        let path = lock_path_in(dir, name);
        let held = try_acquire(&path)?;
        if held.is_some() {
            debug!(mutex = name, path = %path.display(), "acquired system mutex");
        }
        Ok(SystemMutex {
            name: name.to_string(),
            path,
            held,
            disposed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle currently holds the lock.
    pub fn get_mutex_acquired(&self) -> bool {
        self.held.is_some()
    }

    /// True once this handle has released a lock it acquired.
    ///
    /// A handle that never acquired has nothing to release and is never disposed.
    pub fn disposed(&self) -> bool {
        self.disposed
    }

    /// Release the lock if held. Safe to call any number of times.
    pub fn release_mutex(&mut self) {
        let file = match self.held.take() {
            Some(f) => f,
            None => return,
        };
        self.disposed = true;
        // Unlink while still locked: waiters holding the old file notice the
        // path no longer points at it and reopen.
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %e, "could not remove lock file");
            }
        }
        if let Err(e) = FileExt::unlock(&file) {
            warn!(path = %self.path.display(), error = %e, "unlock failed; closing the file releases it");
        }
        debug!(mutex = %self.name, "released system mutex");
    }
}

impl Drop for SystemMutex {
    fn drop(&mut self) {
        self.release_mutex();
    }
}

/// Lock file path for `name` inside `dir`. Every process derives the same path.
pub fn lock_path_in(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{LOCK_FILE_SUFFIX}"))
}

/// Read the owner stamp of `name` in `dir` without taking the lock.
///
/// Returns `Ok(None)` when there is no lock file or it carries no stamp. A
/// stamp naming a dead process means the lock was abandoned and the next
/// acquirer will reclaim it.
pub fn read_lock_owner(dir: &Path, name: &str) -> io::Result<Option<LockOwner>> {
    check_valid_mutex_name(name)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let contents = match fs::read_to_string(lock_path_in(dir, name)) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(parse_stamp(&contents).map(|pid| LockOwner {
        pid,
        alive: is_process_alive(pid),
    }))
}

fn parse_stamp(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

/// Errors that mean the lock directory cannot be used at all, as opposed to a lost race.
fn is_fatal(e: &io::Error) -> bool {
    match e.kind() {
        // Windows reports access denied while a released lock file is pending deletion.
        io::ErrorKind::PermissionDenied => cfg!(not(windows)),
        io::ErrorKind::Unsupported => true,
        _ => false,
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some()
            && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

#[instrument(level = "trace", skip(path), fields(path = %path.display()))]
fn try_acquire(path: &Path) -> io::Result<Option<File>> {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            if is_fatal(&e) {
                return Err(e);
            }
            debug!(error = %e, "could not create lock directory");
            return Ok(None);
        }
    }

    for _ in 0..OPEN_ATTEMPTS {
        // Never truncate: the current holder's stamp must survive a failed attempt.
        let file = match OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
        {
            Ok(f) => f,
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                debug!(error = %e, "could not open lock file");
                return Ok(None);
            }
        };

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                log_contention(path);
                return Ok(None);
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                debug!(error = %e, "lock attempt failed");
                return Ok(None);
            }
        }

        if !still_linked(&file, path) {
            debug!("lock file was released and unlinked before we locked it; reopening");
            let _ = FileExt::unlock(&file);
            continue;
        }

        return match write_stamp(&file, path) {
            Ok(()) => Ok(Some(file)),
            Err(e) => {
                warn!(error = %e, "could not stamp lock file; giving the lock back");
                let _ = FileExt::unlock(&file);
                Ok(None)
            }
        };
    }
    Ok(None)
}

/// True if `path` still names the file we hold open.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(linked)) => held.dev() == linked.dev() && held.ino() == linked.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    // Windows cannot unlink a file another handle holds open without delete sharing
    // being honored at close, so an existing path is the file we opened.
    path.exists()
}

fn write_stamp(mut file: &File, path: &Path) -> io::Result<()> {
    let mut previous = String::new();
    file.read_to_string(&mut previous)?;
    let me = current_pid();
    match parse_stamp(&previous) {
        Some(pid) if pid == me => {
            debug!(path = %path.display(), "lock file carries our own pid from an earlier handle");
        }
        Some(pid) if !is_process_alive(pid) => {
            info!(path = %path.display(), pid, "reclaiming lock abandoned by dead process");
        }
        Some(pid) => {
            debug!(path = %path.display(), pid, "previous owner is alive but released the lock");
        }
        None => {}
    }
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{me}")?;
    file.flush()
}

fn log_contention(path: &Path) {
    let owner = fs::read_to_string(path).ok().and_then(|s| parse_stamp(&s));
    match owner {
        Some(pid) => debug!(
            path = %path.display(),
            owner_pid = pid,
            owner_alive = is_process_alive(pid),
            "system mutex busy"
        ),
        None => debug!(path = %path.display(), "system mutex busy"),
    }
}
