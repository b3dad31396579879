//! Filesystem port for project state files.

use std::path::Path;

use crate::error::PortError;

/// Reads and writes the project's state files.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or is not valid UTF-8.
    fn read_to_string(&self, path: &Path) -> Result<String, PortError>;

    /// Replaces the contents of a file.
    ///
    /// Implementations must never leave a partially written file behind:
    /// either the old or the new contents are visible afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails (permissions, disk full, etc.).
    fn write(&self, path: &Path, contents: &str) -> Result<(), PortError>;

    /// Returns `true` if the path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Creates a directory and all missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn create_dir_all(&self, path: &Path) -> Result<(), PortError>;
}
