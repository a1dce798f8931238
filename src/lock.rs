//! Single-instance PID lock.
//!
//! The lock file holds the pid of the running daemon. Acquisition checks
//! whether that pid is still alive (`kill(pid, 0)`); a dead pid means the
//! previous instance crashed without cleanup and the lock is reclaimed.
//! The lock file is removed on drop, so normal shutdown leaves nothing
//! behind.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::LockError;

/// Held PID lock. Releasing is dropping.
pub struct PidLock {
    path: PathBuf,
    pid: i32,
}

impl PidLock {
    /// Acquire the lock, reclaiming it if the recorded pid is dead.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(pid) = read_pid(path) {
            if process_alive(pid) {
                return Err(LockError::Held {
                    pid,
                    path: path.display().to_string(),
                });
            }
            warn!(
                stale_pid = pid,
                path = %path.display(),
                "Reclaiming lock from dead process"
            );
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Write {
                path: path.display().to_string(),
                source: e,
            })?;
        }

        let pid = std::process::id() as i32;
        std::fs::write(path, pid.to_string()).map_err(|e| LockError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!(pid, path = %path.display(), "Lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Only remove the file if it still records our pid; a reclaimed
        // lock belongs to someone else by now.
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            } else {
                debug!(path = %self.path.display(), "Lock released");
            }
        }
    }
}

/// Read the pid recorded in a lock file, if any.
pub fn read_pid(path: &Path) -> Option<i32> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Signal-0 liveness probe. EPERM means the process exists but belongs to
/// another user, which still counts as alive.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
