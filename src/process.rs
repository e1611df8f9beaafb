//! Process identity and liveness checks used to diagnose abandoned lock files.
//!
//! Liveness is a point-in-time read: a PID recycled by the OS after its original
//! owner exited reads as alive. Lock exclusion never depends on this check; the
//! kernel lock is released when its holder exits regardless of what the stamp says.

/// Identifier of the current process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Return true if a process with `pid` currently exists.
///
/// Unknown errors count as alive so a busy lock is never reported as abandoned by mistake.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return false,
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to another user
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0
}
