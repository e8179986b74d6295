//! Mutual exclusion between overlapping scheduler invocations.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive lock held for the duration of one pass.
///
/// The engine assumes at most one pass mutates a given state file at a time.
/// Schedulers can misfire or overlap when a pass runs long, so the lock file
/// is taken with `create_new` before any state is touched and removed on
/// drop. A leftover lock from a crashed pass must be removed by hand; the
/// file records the owning PID to make that call.
#[derive(Debug)]
pub struct PassLock {
    path: PathBuf,
}

impl PassLock {
    /// Acquire the lock, failing immediately if another pass holds it.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                debug!(path = %path.display(), "pass lock acquired");
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(path).unwrap_or_default();
                Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!(
                        "another pass holds the lock at {} (pid {})",
                        path.display(),
                        holder.trim()
                    ),
                ))
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pass lock");
        }
    }
}
