//! Project store: the on-disk state directory of one project.
//!
//! All file access goes through the `FileSystem` port so the store works
//! with live and in-memory adapters. Directory layout:
//!
//! ```text
//! <project>/
//!   └── .envops/
//!         ├── environment.yml   requirements, human-edited
//!         ├── lockfile.json     lock, machine-generated
//!         ├── config.yaml       project configuration
//!         └── state.lock        advisory lock for mutating commands
//! ```

pub mod guard;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ProjectConfig;
use crate::error::OpsError;
use crate::lock::LockDocument;
use crate::ports::FileSystem;
use crate::requirements::RequirementsDocument;

pub use guard::StateGuard;

/// Name of the state directory inside a project.
pub const STATE_DIR: &str = ".envops";
const REQUIREMENTS_FILE: &str = "environment.yml";
const LOCK_FILE: &str = "lockfile.json";
const CONFIG_FILE: &str = "config.yaml";
const STATE_LOCK_FILE: &str = "state.lock";

/// Walks from `start` upward until a directory containing `.envops/` is
/// found and returns that directory.
///
/// # Errors
///
/// Returns [`OpsError::NotInitialized`] if no ancestor has a state
/// directory.
pub fn discover(fs: &dyn FileSystem, start: &Path) -> Result<PathBuf, OpsError> {
    start
        .ancestors()
        .find(|dir| fs.exists(&dir.join(STATE_DIR)))
        .map(Path::to_path_buf)
        .ok_or_else(|| OpsError::NotInitialized(start.to_path_buf()))
}

/// Reads and writes one project's state files.
pub struct ProjectStore<'a> {
    fs: &'a dyn FileSystem,
    root: PathBuf,
}

impl<'a> ProjectStore<'a> {
    /// Creates a store for the project rooted at `root`.
    #[must_use]
    pub fn new(fs: &'a dyn FileSystem, root: &Path) -> Self {
        Self { fs, root: root.to_path_buf() }
    }

    /// The project directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.envops/` directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Path of the requirements document.
    #[must_use]
    pub fn requirements_path(&self) -> PathBuf {
        self.state_dir().join(REQUIREMENTS_FILE)
    }

    /// Path of the lock.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    /// Path of the project configuration.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(CONFIG_FILE)
    }

    /// Path of the advisory state lock.
    #[must_use]
    pub fn state_lock_path(&self) -> PathBuf {
        self.state_dir().join(STATE_LOCK_FILE)
    }

    /// Whether the state directory exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.fs.exists(&self.state_dir())
    }

    /// Creates the state directory with `config` and `requirements`.
    ///
    /// An existing lock is left alone; it becomes stale against the new
    /// requirements.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Store`] if the project is already initialized and
    /// `force` is not set, or if a file cannot be written.
    pub fn init(
        &self,
        config: &ProjectConfig,
        requirements: &RequirementsDocument,
        force: bool,
    ) -> Result<(), OpsError> {
        if self.is_initialized() && !force {
            return Err(OpsError::Store(format!(
                "{} already exists; pass --force to reinitialize",
                self.state_dir().display()
            )));
        }
        self.fs.create_dir_all(&self.state_dir()).map_err(|e| {
            OpsError::Store(format!("failed to create {}: {e}", self.state_dir().display()))
        })?;
        self.save_config(config)?;
        self.save_requirements(requirements)
    }

    /// Loads and validates the requirements document.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Store`] if the file cannot be read and
    /// [`OpsError::Parse`] if it is malformed.
    pub fn load_requirements(&self) -> Result<RequirementsDocument, OpsError> {
        let raw = self.read(&self.requirements_path())?;
        Ok(RequirementsDocument::parse(&raw)?)
    }

    /// Reads the requirements document verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Store`] if the file cannot be read.
    pub fn read_requirements_raw(&self) -> Result<String, OpsError> {
        self.read(&self.requirements_path())
    }

    /// Writes the requirements document atomically.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Parse`] if the document cannot be serialized and
    /// [`OpsError::Store`] if the write fails.
    pub fn save_requirements(&self, requirements: &RequirementsDocument) -> Result<(), OpsError> {
        self.write(&self.requirements_path(), &requirements.serialize()?)
    }

    /// Loads the lock; `Ok(None)` when no lock has been generated yet.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Store`] if the file exists but cannot be read and
    /// [`OpsError::LockFile`] if it is invalid.
    pub fn load_lock(&self) -> Result<Option<LockDocument>, OpsError> {
        let path = self.lock_path();
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        LockDocument::from_json(&self.read(&path)?).map(Some)
    }

    /// Writes the lock atomically.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::LockFile`] if serialization fails and
    /// [`OpsError::Store`] if the write fails.
    pub fn save_lock(&self, lock: &LockDocument) -> Result<(), OpsError> {
        self.write(&self.lock_path(), &lock.to_json()?)
    }

    /// Loads the project configuration; defaults (with the environment named
    /// after the project directory) when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] if the file is malformed.
    pub fn load_config(&self) -> Result<ProjectConfig, OpsError> {
        let path = self.config_path();
        if !self.fs.exists(&path) {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(ProjectConfig::for_env(&default_env_name(&self.root)));
        }
        ProjectConfig::from_yaml(&self.read(&path)?)
    }

    /// Writes the project configuration atomically.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] if serialization fails and
    /// [`OpsError::Store`] if the write fails.
    pub fn save_config(&self, config: &ProjectConfig) -> Result<(), OpsError> {
        self.write(&self.config_path(), &config.to_yaml()?)
    }

    /// Takes the advisory state lock for a mutating command.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::ConcurrentAccess`] if another invocation holds it.
    pub fn lock_state(&self, holder: &str) -> Result<StateGuard, OpsError> {
        StateGuard::acquire(&self.state_lock_path(), holder)
    }

    fn read(&self, path: &Path) -> Result<String, OpsError> {
        self.fs
            .read_to_string(path)
            .map_err(|e| OpsError::Store(format!("failed to read {}: {e}", path.display())))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), OpsError> {
        debug!(path = %path.display(), bytes = contents.len(), "writing project file");
        self.fs
            .write(path, contents)
            .map_err(|e| OpsError::Store(format!("failed to write {}: {e}", path.display())))
    }
}

/// Environment name derived from the project directory name.
#[must_use]
pub fn default_env_name(root: &Path) -> String {
    root.file_name()
        .and_then(|n| n.to_str())
        .map(|n| {
            n.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
                .collect::<String>()
        })
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "envops-env".to_string())
}
