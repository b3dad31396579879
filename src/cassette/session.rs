//! Recording session managing per-port cassette recorders.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::recorder::CassetteRecorder;

/// Per-port recorders for one `ENVOPS_RECORD` session. Each port writes a
/// separate `<port>.cassette.yaml` into the output directory.
pub struct RecordingSession {
    /// Recorder for clock interactions.
    pub clock: Arc<Mutex<CassetteRecorder>>,
    /// Recorder for solver interactions.
    pub solver: Arc<Mutex<CassetteRecorder>>,
    /// Recorder for runtime-manager interactions.
    pub runtime: Arc<Mutex<CassetteRecorder>>,
    /// Recorder for package-index interactions.
    pub index: Arc<Mutex<CassetteRecorder>>,
    output_dir: PathBuf,
}

impl RecordingSession {
    /// Starts a session writing into `output_dir`, which is created if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or already holds
    /// cassettes.
    pub fn new(output_dir: &Path) -> Result<Self, String> {
        if output_dir.join("runtime.cassette.yaml").exists() {
            return Err(format!("Cassette directory already in use: {}", output_dir.display()));
        }
        std::fs::create_dir_all(output_dir)
            .map_err(|e| format!("Failed to create cassette directory: {e}"))?;

        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let make_recorder = |port: &str| {
            let path = output_dir.join(format!("{port}.cassette.yaml"));
            Arc::new(Mutex::new(CassetteRecorder::new(path, format!("{timestamp}-{port}"))))
        };

        Ok(Self {
            clock: make_recorder("clock"),
            solver: make_recorder("solver"),
            runtime: make_recorder("runtime"),
            index: make_recorder("index"),
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// The directory cassettes are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes every port's cassette. The recording context must have been
    /// dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorder is still shared or a file cannot be
    /// written.
    pub fn finish(self) -> Result<PathBuf, String> {
        fn finish_one(arc: Arc<Mutex<CassetteRecorder>>, port: &str) -> Result<(), String> {
            let recorder = Arc::try_unwrap(arc)
                .map_err(|_| format!("Recording adapter for {port} still has references"))?
                .into_inner()
                .map_err(|e| format!("Recorder lock for {port} poisoned: {e}"))?;
            recorder.finish().map_err(|e| format!("Failed to write {port} cassette: {e}"))?;
            Ok(())
        }

        finish_one(self.clock, "clock")?;
        finish_one(self.solver, "solver")?;
        finish_one(self.runtime, "runtime")?;
        finish_one(self.index, "index")?;
        Ok(self.output_dir)
    }
}
