//! Cassette configuration for composable per-port replay.

use std::path::{Path, PathBuf};

use super::format::Cassette;
use super::replayer::CassetteReplayer;

/// Per-port cassette file paths. Ports without a path panic if called
/// during replay. The filesystem is always live and has no cassette.
#[derive(Debug, Clone, Default)]
pub struct CassetteConfig {
    /// Path to the clock port cassette file.
    pub clock: Option<PathBuf>,
    /// Path to the solver port cassette file.
    pub solver: Option<PathBuf>,
    /// Path to the runtime-manager port cassette file.
    pub runtime: Option<PathBuf>,
    /// Path to the package-index port cassette file.
    pub index: Option<PathBuf>,
}

/// Per-port replayers, each with its own interaction stream.
pub struct PortReplayers {
    /// Replayer for the clock port.
    pub clock: Option<CassetteReplayer>,
    /// Replayer for the solver port.
    pub solver: Option<CassetteReplayer>,
    /// Replayer for the runtime-manager port.
    pub runtime: Option<CassetteReplayer>,
    /// Replayer for the package-index port.
    pub index: Option<CassetteReplayer>,
}

impl CassetteConfig {
    /// Returns a config where all port paths are `None`.
    #[must_use]
    pub fn panic_on_unspecified() -> Self {
        Self::default()
    }

    /// Config pointing every port at the `<port>.cassette.yaml` files a
    /// recording session wrote into `dir`. Missing files are left unset.
    #[must_use]
    pub fn from_session_dir(dir: &Path) -> Self {
        let existing = |port: &str| {
            let path = dir.join(format!("{port}.cassette.yaml"));
            path.exists().then_some(path)
        };
        Self {
            clock: existing("clock"),
            solver: existing("solver"),
            runtime: existing("runtime"),
            index: existing("index"),
        }
    }

    /// Load a cassette file and create a single replayer.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_monolithic(path: &Path) -> Result<CassetteReplayer, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read cassette file {}: {e}", path.display()))?;
        let cassette: Cassette = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse cassette file {}: {e}", path.display()))?;
        Ok(CassetteReplayer::new(&cassette))
    }

    /// Load all configured per-port cassette files.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured cassette file cannot be read or parsed.
    pub fn load_all(&self) -> Result<PortReplayers, String> {
        let load = |p: &Option<PathBuf>| p.as_deref().map(Self::load_monolithic).transpose();
        Ok(PortReplayers {
            clock: load(&self.clock)?,
            solver: load(&self.solver)?,
            runtime: load(&self.runtime)?,
            index: load(&self.index)?,
        })
    }
}
