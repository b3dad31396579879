//! Drift scenarios driven through the command layer with replayed runtime
//! and solver answers.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use envops::adapters::live::filesystem::LiveFileSystem;
use envops::cassette::recorder::CassetteRecorder;
use envops::cli::Command;
use envops::commands::dispatch_with_context;
use envops::config::ProjectConfig;
use envops::context::ServiceContext;
use envops::error::OpsError;
use envops::requirements::RequirementsDocument;
use envops::store::ProjectStore;

fn context(dir: &Path, name: &str, calls: &[(&str, &str, Value)]) -> ServiceContext {
    let mut recorder = CassetteRecorder::new(dir.join(format!("{name}.cassette.yaml")), name);
    for (port, method, output) in calls {
        recorder.record(*port, *method, json!({}), output.clone());
    }
    let path: PathBuf = recorder.finish().unwrap();
    ServiceContext::replaying(&path).unwrap()
}

fn conda_installed(name: &str, version: &str) -> Value {
    json!({"manager": "conda", "name": name, "version": version, "channel": "defaults"})
}

fn conda_resolved(name: &str, version: &str) -> Value {
    json!({"manager": "conda", "name": name, "version": version, "channel": "defaults", "build": "0"})
}

fn run(ctx: &ServiceContext, root: &Path, command: Command) -> Result<String, OpsError> {
    let mut out = Vec::new();
    dispatch_with_context(&command, ctx, root, &mut out)?;
    Ok(String::from_utf8(out).unwrap())
}

/// Project with `numpy` declared, locked, and installed.
fn synced_project(root: &Path, cassettes: &Path) {
    let store = ProjectStore::new(&LiveFileSystem, root);
    let requirements = RequirementsDocument::parse(
        "name: demo\nchannel-order: [defaults]\ndependencies:\n  - numpy\n",
    )
    .unwrap();
    store.init(&ProjectConfig::for_env("demo"), &requirements, false).unwrap();

    let ctx = context(
        cassettes,
        "initial-sync",
        &[
            ("clock", "now", json!("2025-01-01T00:00:00Z")),
            ("clock", "now", json!("2025-01-01T00:00:01Z")),
            ("runtime", "list_installed", json!({"Ok": []})),
            ("solver", "solve", json!({"Ok": {"packages": [conda_resolved("numpy", "1.26.4")]}})),
            ("runtime", "list_installed", json!({"Ok": []})),
            (
                "runtime",
                "apply",
                json!({"Ok": [{"key": {"manager": "conda", "name": "numpy"}, "kind": "install"}]}),
            ),
            ("runtime", "list_installed", json!({"Ok": [conda_installed("numpy", "1.26.4")]})),
        ],
    );
    run(&ctx, root, Command::Sync { dry_run: false }).unwrap();
}

#[test]
fn empty_environment_is_locked_then_installed() {
    let cassettes = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    synced_project(project.path(), cassettes.path());

    let ctx = context(
        cassettes.path(),
        "status",
        &[("runtime", "list_installed", json!({"Ok": [conda_installed("numpy", "1.26.4")]}))],
    );
    let text = run(&ctx, project.path(), Command::Status { json: false }).unwrap();
    assert!(text.contains("requirements vs lock:        in_sync"));
    assert!(text.contains("lock vs environment:         in_sync"));
    assert!(text.contains("agree"));
}

#[test]
fn manual_install_shows_the_environment_ahead() {
    let cassettes = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    synced_project(project.path(), cassettes.path());

    let ctx = context(
        cassettes.path(),
        "status-ahead",
        &[(
            "runtime",
            "list_installed",
            json!({"Ok": [conda_installed("numpy", "1.26.4"), conda_installed("scipy", "1.13.0")]}),
        )],
    );
    let text = run(&ctx, project.path(), Command::Status { json: false }).unwrap();
    assert!(text.contains("requirements vs lock:        in_sync"));
    assert!(text.contains("lock vs environment:         ahead"));
    assert!(text.contains("to_remove    conda:scipy"));
}

#[test]
fn removed_requirement_regenerates_the_lock_before_any_removal() {
    let cassettes = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    synced_project(project.path(), cassettes.path());

    let ctx = context(
        cassettes.path(),
        "remove-numpy",
        &[
            ("clock", "now", json!("2025-01-02T00:00:00Z")),
            ("runtime", "list_installed", json!({"Ok": [conda_installed("numpy", "1.26.4")]})),
        ],
    );
    run(&ctx, project.path(), Command::Remove { names: vec!["numpy".into()] }).unwrap();
    let text = run(&ctx, project.path(), Command::Sync { dry_run: true }).unwrap();
    assert!(text.contains("requirements vs lock:        stale"));
    assert!(text.contains("REGENERATE_LOCK"));
    assert!(!text.contains("  REMOVE "));
}
