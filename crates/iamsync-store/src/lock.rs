//! Exclusive lock over a state directory.
//!
//! Two CLI runs converging the same state directory would race on the
//! snapshot files; the second one fails fast instead.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn state_lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join("state.lock")
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("state lock busy: {lock_path}")]
    Busy { lock_path: String },

    #[error("failed to acquire state lock {lock_path}: {message}")]
    Io { lock_path: String, message: String },
}

/// Held for the lifetime of one run; the lock file is removed on drop.
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    _file: File,
}

impl StateLock {
    pub fn acquire(state_dir: &Path) -> Result<Self, LockError> {
        let lock_path = state_lock_path(state_dir);
        let io_error = |message: String| LockError::Io {
            lock_path: lock_path.display().to_string(),
            message,
        };
        fs::create_dir_all(state_dir).map_err(|e| io_error(e.to_string()))?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(Self {
                    lock_path,
                    _file: file,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(LockError::Busy {
                lock_path: lock_path.display().to_string(),
            }),
            Err(err) => Err(io_error(err.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}
