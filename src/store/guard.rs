//! Advisory lock over the project state directory.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tracing::debug;

use crate::error::OpsError;

/// Exclusive hold on the project state, released when dropped.
///
/// Mutating commands take the guard before reading requirements or lock
/// and keep it until every write has finished, so two invocations in one
/// project never interleave writes.
#[derive(Debug)]
pub struct StateGuard {
    file: File,
    path: PathBuf,
}

impl StateGuard {
    /// Takes the lock at `path` without waiting, recording `holder` in the
    /// lock file for whoever is turned away next.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::ConcurrentAccess`] when another process holds the
    /// lock and [`OpsError::Store`] when the lock file cannot be opened.
    pub fn acquire(path: &Path, holder: &str) -> Result<Self, OpsError> {
        let io_err = |e: std::io::Error| {
            OpsError::Store(format!("failed to open state lock {}: {e}", path.display()))
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let mut current = String::new();
                let holder = file
                    .read_to_string(&mut current)
                    .ok()
                    .map(|_| current.trim().to_string())
                    .filter(|h| !h.is_empty());
                return Err(OpsError::ConcurrentAccess { path: path.to_path_buf(), holder });
            }
            Err(e) => return Err(io_err(e)),
        }

        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        writeln!(file, "{holder}").map_err(io_err)?;
        debug!(path = %path.display(), "acquired state lock");
        Ok(Self { file, path: path.to_path_buf() })
    }

    /// The lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}
