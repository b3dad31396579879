//! Live filesystem adapter using `std::fs`.

use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::PortError;
use crate::ports::FileSystem;

/// Live filesystem adapter backed by real disk I/O.
///
/// Writes go to a temporary file in the target directory that is then
/// renamed over the target, so readers see either the old or the new file.
pub struct LiveFileSystem;

impl FileSystem for LiveFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, PortError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), PortError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), PortError> {
        Ok(std::fs::create_dir_all(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_replaces_contents_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("lockfile.json");

        LiveFileSystem.write(&path, "first").unwrap();
        LiveFileSystem.write(&path, "second").unwrap();

        assert_eq!(LiveFileSystem.read_to_string(&path).unwrap(), "second");
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["lockfile.json"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LiveFileSystem.read_to_string(&dir.path().join("nope")).is_err());
        assert!(!LiveFileSystem.exists(&dir.path().join("nope")));
    }
}
