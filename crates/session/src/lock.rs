//! Cross-process session locks
//!
//! Each live session holds one `<uuid>.lock` file under the lock
//! directory, containing its pid as a decimal string. Acquisition scans
//! the directory, deletes locks whose owner is no longer alive, and
//! rejects when the survivors already meet the cap. Release deletes the
//! own file; `Drop` is the last-resort release for panics and early
//! returns.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::SessionError;

/// Default lock directory: `<user-home>/.claude-voice-sessions/`
pub fn default_lock_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(voiceloop_config::constants::session::LOCK_DIR_NAME)
}

/// Whether a process with this pid is alive. Signal 0 probes without
/// delivering; EPERM means the process exists but belongs to another
/// user.
fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        true
    } else {
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

/// A held session lock
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    released: bool,
}

impl SessionLock {
    /// Acquire a slot: clean stale locks, enforce the cap, create our
    /// own pid file atomically.
    pub fn acquire(dir: &Path, max_sessions: usize) -> Result<Self, SessionError> {
        fs::create_dir_all(dir)?;

        let mut live = 0usize;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e != "lock").unwrap_or(true) {
                continue;
            }

            let owner = fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse::<i32>().ok());

            match owner {
                Some(pid) if pid_alive(pid) => live += 1,
                _ => {
                    tracing::debug!(path = %path.display(), "removing stale session lock");
                    let _ = fs::remove_file(&path);
                },
            }
        }

        if live >= max_sessions {
            return Err(SessionError::SessionLimit {
                active: live,
                max: max_sessions,
            });
        }

        let path = dir.join(format!("{}.lock", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        write!(file, "{}", std::process::id())?;

        tracing::debug!(path = %path.display(), "session lock acquired");
        Ok(Self {
            path,
            released: false,
        })
    }

    /// Delete the own lock file.
    pub fn release(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), "failed to remove lock: {}", e);
            }
            self.released = true;
        }
    }

    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pid far beyond any real pid_max, guaranteed dead.
    const DEAD_PID: i32 = 1_999_999_999;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = SessionLock::acquire(dir.path(), 1).unwrap();
        assert!(lock.path().exists());

        let contents = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents, std::process::id().to_string());

        lock.release();
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_cap_rejects_second_session() {
        let dir = tempfile::tempdir().unwrap();
        let _first = SessionLock::acquire(dir.path(), 1).unwrap();

        let err = SessionLock::acquire(dir.path(), 1).unwrap_err();
        match err {
            SessionError::SessionLimit { active, max } => {
                assert_eq!(active, 1);
                assert_eq!(max, 1);
            },
            other => panic!("unexpected error: {other}"),
        }

        // the first session's file survived the failed attempt
        assert!(_first.path().exists());
    }

    #[test]
    fn test_stale_lock_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("dead-session.lock");
        fs::write(&stale, DEAD_PID.to_string()).unwrap();

        // the stale owner is gone, so acquisition succeeds under cap 1
        let lock = SessionLock::acquire(dir.path(), 1).unwrap();
        assert!(!stale.exists());
        assert!(lock.path().exists());
    }

    #[test]
    fn test_unparseable_lock_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.lock");
        fs::write(&garbage, "not a pid").unwrap();

        let _lock = SessionLock::acquire(dir.path(), 1).unwrap();
        assert!(!garbage.exists());
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let lock = SessionLock::acquire(dir.path(), 1).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_live_lock_count_matches_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let a = SessionLock::acquire(dir.path(), 4).unwrap();
        let b = SessionLock::acquire(dir.path(), 4).unwrap();

        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 2);

        drop(a);
        drop(b);
        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_non_lock_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.txt"), "not a lock").unwrap();

        let _lock = SessionLock::acquire(dir.path(), 1).unwrap();
        assert!(dir.path().join("README.txt").exists());
    }
}
