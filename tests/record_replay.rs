//! Record-replay round-trip integration test.
//!
//! A cassette written with `CassetteRecorder` drives a full `sync` through
//! `ServiceContext::replaying()`; replaying it into a second project must
//! produce the same output and the same lock.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use envops::cassette::recorder::CassetteRecorder;
use envops::cli::Command;
use envops::commands::dispatch_with_context;
use envops::config::ProjectConfig;
use envops::context::ServiceContext;
use envops::adapters::live::filesystem::LiveFileSystem;
use envops::requirements::RequirementsDocument;
use envops::store::ProjectStore;

fn write_cassette(path: &Path, calls: &[(&str, &str, Value)]) -> PathBuf {
    let mut recorder = CassetteRecorder::new(path, "sync-fresh-project");
    for (port, method, output) in calls {
        recorder.record(*port, *method, json!({}), output.clone());
    }
    recorder.finish().unwrap()
}

fn numpy_resolved() -> Value {
    json!({
        "manager": "conda",
        "name": "numpy",
        "version": "1.26.4",
        "channel": "defaults",
        "build": "py311h0",
        "url": "https://repo.anaconda.com/pkgs/main/linux-64/numpy-1.26.4-py311h0.conda",
        "hash": "sha256:5f2a"
    })
}

fn numpy_installed() -> Value {
    json!({"manager": "conda", "name": "numpy", "version": "1.26.4", "channel": "defaults"})
}

fn fresh_project(root: &Path) {
    let store = ProjectStore::new(&LiveFileSystem, root);
    let requirements = RequirementsDocument::parse(
        "name: demo\nchannel-order: [defaults]\ndependencies:\n  - numpy\n",
    )
    .unwrap();
    store.init(&ProjectConfig::for_env("demo"), &requirements, false).unwrap();
}

fn sync_once(cassette: &Path) -> (String, String) {
    let dir = tempfile::tempdir().unwrap();
    fresh_project(dir.path());
    let ctx = ServiceContext::replaying(cassette).unwrap();

    let mut out = Vec::new();
    dispatch_with_context(&Command::Sync { dry_run: false }, &ctx, dir.path(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap().replace(&dir.path().display().to_string(), "<root>");
    let lock = std::fs::read_to_string(dir.path().join(".envops/lockfile.json")).unwrap();
    (text, lock)
}

#[test]
fn recorded_sync_replays_identically() {
    let dir = tempfile::tempdir().unwrap();
    let cassette = write_cassette(
        &dir.path().join("sync.cassette.yaml"),
        &[
            ("clock", "now", json!("2025-03-15T14:30:00Z")),
            ("runtime", "list_installed", json!({"Ok": []})),
            ("solver", "solve", json!({"Ok": {"packages": [numpy_resolved()]}})),
            ("clock", "now", json!("2025-03-15T14:30:05Z")),
            ("runtime", "list_installed", json!({"Ok": []})),
            (
                "runtime",
                "apply",
                json!({"Ok": [{"key": {"manager": "conda", "name": "numpy"}, "kind": "install"}]}),
            ),
            ("runtime", "list_installed", json!({"Ok": [numpy_installed()]})),
        ],
    );

    let (first_out, first_lock) = sync_once(&cassette);
    assert!(first_out.contains("Wrote <root>/.envops/lockfile.json."));
    assert!(first_out.contains("installed conda:numpy"));
    assert!(first_out.contains("requirements vs environment: in_sync"));
    assert!(first_lock.contains("2025-03-15T14:30:05Z"));
    assert!(first_lock.contains("sha256:5f2a"));

    let (second_out, second_lock) = sync_once(&cassette);
    assert_eq!(first_out, second_out);
    assert_eq!(first_lock, second_lock);
}

#[test]
fn recorded_solver_failure_replays_as_a_solve_error() {
    let dir = tempfile::tempdir().unwrap();
    let cassette = write_cassette(
        &dir.path().join("failure.cassette.yaml"),
        &[
            ("clock", "now", json!("2025-03-15T14:30:00Z")),
            ("runtime", "list_installed", json!({"Ok": []})),
            ("solver", "solve", json!({"Err": "nothing provides numpy >=9 needed by demo"})),
        ],
    );

    let project = tempfile::tempdir().unwrap();
    fresh_project(project.path());
    let ctx = ServiceContext::replaying(&cassette).unwrap();
    let mut out = Vec::new();
    let err =
        dispatch_with_context(&Command::Sync { dry_run: false }, &ctx, project.path(), &mut out)
            .unwrap_err();
    assert!(err.to_string().contains("nothing provides numpy"));
    assert!(!project.path().join(".envops/lockfile.json").exists());
}
