//! Command dispatch and handlers.
//!
//! Handlers write product output to the writer they are given and return
//! [`OpsError`]; `dispatch` turns errors into the message printed by `main`.

pub mod config;
pub mod environment;
pub mod init;
pub mod lock;
pub mod reqs;
pub mod status;
pub mod sync;

use std::env;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::adapters::live::filesystem::LiveFileSystem;
use crate::cassette::session::RecordingSession;
use crate::cli::{Command, ConfigCommand, ReqsCommand};
use crate::config::ProjectConfig;
use crate::context::ServiceContext;
use crate::error::OpsError;
use crate::store::{default_env_name, discover, ProjectStore};

/// Dispatch a parsed command to its handler.
///
/// The project is `ENVOPS_PROJECT` when set, otherwise the nearest ancestor
/// of the working directory holding `.envops/` (the working directory
/// itself for `init`). When `ENVOPS_RECORD` is set to a directory path, all
/// port interactions are recorded to per-port cassette files there.
///
/// # Errors
///
/// Returns an error string if the project cannot be found or the command
/// fails.
pub fn dispatch(command: &Command) -> Result<(), String> {
    let root = project_root(command).map_err(|e| e.to_string())?;
    let config = ProjectStore::new(&LiveFileSystem, &root).load_config().unwrap_or_else(|e| {
        debug!(error = %e, "unreadable config; adapters use defaults");
        ProjectConfig::for_env(&default_env_name(&root))
    });

    let (ctx, session) = if let Some(dir) = env::var_os("ENVOPS_RECORD") {
        let (ctx, session) = ServiceContext::recording(&config, Path::new(&dir))?;
        (ctx, Some(session))
    } else {
        (ServiceContext::live(&config), None)
    };

    let mut stdout = std::io::stdout().lock();
    let result = dispatch_with_context(command, &ctx, &root, &mut stdout);

    // Finish recording after the command completes, even on error.
    if let Some(session) = session {
        drop(ctx);
        finish_recording(session)?;
    }

    result.map_err(|e| e.to_string())
}

/// Dispatch a command against `root` with the given service context.
///
/// # Errors
///
/// Returns the handler's error.
pub fn dispatch_with_context(
    command: &Command,
    ctx: &ServiceContext,
    root: &Path,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    match command {
        Command::Init { name, force } => init::run(ctx, root, name.as_deref(), *force, out),
        Command::Status { json } => status::run(ctx, root, *json, out),
        Command::Add(args) => reqs::add(ctx, root, args, out),
        Command::Remove { names } => reqs::remove(ctx, root, names, out),
        Command::Sync { dry_run } => sync::run(ctx, root, *dry_run, out),
        Command::Install(args) => sync::install(ctx, root, args, out),
        Command::Uninstall { names } => sync::uninstall(ctx, root, names, out),
        Command::Lock => lock::run(ctx, root, out),
        Command::Delete => environment::delete(ctx, root, out),
        Command::Clean => environment::clean(ctx, root, out),
        Command::Reqs { action } => match action {
            ReqsCommand::List => reqs::list(ctx, root, out),
            ReqsCommand::Edit => reqs::edit(ctx, root, out),
            ReqsCommand::Check => reqs::check(ctx, root, out),
        },
        Command::Config { action } => match action {
            ConfigCommand::Get { key } => config::get(ctx, root, key, out),
            ConfigCommand::Set { key, value } => config::set(ctx, root, key, value, out),
            ConfigCommand::List => config::list(ctx, root, out),
        },
    }
}

fn project_root(command: &Command) -> Result<PathBuf, OpsError> {
    if let Some(dir) = env::var_os("ENVOPS_PROJECT") {
        return Ok(PathBuf::from(dir));
    }
    let cwd = env::current_dir()?;
    match command {
        Command::Init { .. } => Ok(cwd),
        _ => discover(&LiveFileSystem, &cwd),
    }
}

/// Finish a recording session and print the output directory.
fn finish_recording(session: RecordingSession) -> Result<(), String> {
    let output_dir = session.finish()?;
    eprintln!("Recording saved to: {}", output_dir.display());
    Ok(())
}

/// Drives `fut` to completion on a current-thread runtime.
pub(crate) fn block_on<T>(fut: impl Future<Output = Result<T, OpsError>>) -> Result<T, OpsError> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(fut)
}

/// Description written into the state lock for whoever is turned away.
pub(crate) fn holder(ctx: &ServiceContext, command: &str) -> String {
    format!(
        "envops {command} (pid {}, since {}, run {})",
        std::process::id(),
        ctx.clock.now().to_rfc3339(),
        Uuid::new_v4()
    )
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::adapters::live::filesystem::LiveFileSystem;
    use crate::cli::Cli;
    use crate::testing::{conda, context, installed, FakeRuntime, FakeSolver};

    fn cmd(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("envops").chain(args.iter().copied())).unwrap().into_command()
    }

    fn live_context(solver: FakeSolver, runtime: FakeRuntime) -> ServiceContext {
        let mut ctx = context(solver, runtime);
        ctx.fs = Box::new(LiveFileSystem);
        ctx
    }

    fn run(ctx: &ServiceContext, root: &Path, args: &[&str]) -> Result<String, OpsError> {
        let mut out = Vec::new();
        dispatch_with_context(&cmd(args), ctx, root, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn solver() -> FakeSolver {
        FakeSolver::solving(vec![
            conda("python", "3.11.9"),
            conda("pip", "24.0"),
            conda("numpy", "1.26.4"),
        ])
    }

    #[test]
    fn init_add_sync_status_round() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::default();
        let ctx = live_context(solver(), runtime.clone());

        let text = run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();
        assert!(text.contains("environment `demo`"));
        let text = run(&ctx, dir.path(), &["add", "numpy>=1.26"]).unwrap();
        assert!(text.contains("Adding defaults::numpy>=1.26"));

        let text = run(&ctx, dir.path(), &["sync"]).unwrap();
        assert!(text.contains("Created environment `demo`."));
        assert!(text.contains("installed conda:numpy"));
        assert!(text.contains("requirements vs environment: in_sync"));
        assert_eq!(runtime.names(), ["numpy=1.26.4", "pip=24.0", "python=3.11.9"]);

        let json = run(&ctx, dir.path(), &["status", "--json"]).unwrap();
        let status: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(status["env_name"], "demo");
        assert_eq!(status["in_sync"], true);
        assert_eq!(status["environment_exists"], true);
    }

    #[test]
    fn dry_run_prints_the_plan_and_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::default();
        let ctx = live_context(solver(), runtime.clone());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();

        let text = run(&ctx, dir.path(), &["sync", "--dry-run"]).unwrap();
        assert!(text.contains("Plan:"));
        assert!(text.contains("CREATE environment `demo`"));
        assert!(runtime.names().is_empty());
        assert!(!dir.path().join(".envops/lockfile.json").exists());
    }

    #[test]
    fn install_and_uninstall_sync_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::with(Vec::new());
        let mut ctx = live_context(solver(), runtime.clone());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();

        run(&ctx, dir.path(), &["install", "numpy"]).unwrap();
        assert!(runtime.names().contains(&"numpy=1.26.4".to_string()));

        ctx.solver =
            Box::new(FakeSolver::solving(vec![conda("python", "3.11.9"), conda("pip", "24.0")]));
        let text = run(&ctx, dir.path(), &["uninstall", "numpy"]).unwrap();
        assert!(text.contains("Removing defaults::numpy"));
        assert_eq!(runtime.names(), ["pip=24.0", "python=3.11.9"]);
    }

    #[test]
    fn clean_rebuilds_from_the_lock_and_delete_removes_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::default();
        let ctx = live_context(solver(), runtime.clone());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();
        run(&ctx, dir.path(), &["install", "numpy"]).unwrap();
        runtime.installed.lock().unwrap().as_mut().unwrap().push(installed("scipy", "1.13.0"));

        let text = run(&ctx, dir.path(), &["clean"]).unwrap();
        assert!(text.contains("Created environment `demo`."));
        assert!(!text.contains("Wrote"));
        assert!(text.contains("requirements vs environment: in_sync"));
        assert_eq!(runtime.names(), ["numpy=1.26.4", "pip=24.0", "python=3.11.9"]);

        let text = run(&ctx, dir.path(), &["delete"]).unwrap();
        assert_eq!(text.trim(), "Deleted environment `demo`.");
        assert!(runtime.installed.lock().unwrap().is_none());
        assert!(dir.path().join(".envops/lockfile.json").exists());

        let text = run(&ctx, dir.path(), &["delete"]).unwrap();
        assert!(text.contains("does not exist"));
    }

    #[test]
    fn lock_command_writes_a_fresh_lock() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = live_context(solver(), FakeRuntime::default());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();

        let text = run(&ctx, dir.path(), &["lock"]).unwrap();
        assert!(text.contains("Locked 3 package(s)"));
        assert!(dir.path().join(".envops/lockfile.json").exists());
    }

    #[test]
    fn solve_failure_keeps_the_old_lock_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = live_context(FakeSolver::failing("nothing provides numpy"), FakeRuntime::default());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();

        let err = run(&ctx, dir.path(), &["lock"]).unwrap_err();
        assert!(err.to_string().contains("nothing provides numpy"));
        assert!(!dir.path().join(".envops/lockfile.json").exists());
    }

    #[test]
    fn mutating_commands_are_turned_away_while_the_project_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = live_context(solver(), FakeRuntime::default());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();

        let store = ProjectStore::new(&LiveFileSystem, dir.path());
        let _held = store.lock_state("envops sync (test)").unwrap();
        let err = run(&ctx, dir.path(), &["add", "numpy"]).unwrap_err();
        assert!(matches!(err, OpsError::ConcurrentAccess { .. }));
        assert!(err.to_string().contains("envops sync (test)"));

        // Read-only commands still work.
        let text = run(&ctx, dir.path(), &["reqs", "list"]).unwrap();
        assert!(!text.contains("numpy"));
    }

    #[test]
    fn configuration_is_read_only_after_the_project_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = live_context(solver(), FakeRuntime::default());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();

        let store = ProjectStore::new(&LiveFileSystem, dir.path());
        std::fs::write(store.config_path(), "env_name: [not, a, name]\n").unwrap();
        let _held = store.lock_state("envops config set (test)").unwrap();
        let mutating: [&[&str]; 4] =
            [&["sync"], &["install", "numpy"], &["uninstall", "numpy"], &["lock"]];
        for args in mutating {
            let err = run(&ctx, dir.path(), args).unwrap_err();
            assert!(matches!(err, OpsError::ConcurrentAccess { .. }), "{args:?}: {err}");
        }
    }

    #[test]
    fn config_set_validates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = live_context(solver(), FakeRuntime::default());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();

        let text = run(&ctx, dir.path(), &["config", "set", "sync.max_rounds", "5"]).unwrap();
        assert_eq!(text.trim(), "sync.max_rounds = 5");
        assert_eq!(run(&ctx, dir.path(), &["config", "get", "sync.max_rounds"]).unwrap().trim(), "5");
        assert!(run(&ctx, dir.path(), &["config", "set", "sync.max_rounds", "many"]).is_err());
        assert!(run(&ctx, dir.path(), &["config", "list"]).unwrap().contains("env_name = demo"));
    }

    #[test]
    fn reinitializing_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = live_context(solver(), FakeRuntime::default());
        run(&ctx, dir.path(), &["init", "--name", "demo"]).unwrap();
        assert!(matches!(
            run(&ctx, dir.path(), &["init", "--name", "other"]),
            Err(OpsError::Store(_))
        ));
        run(&ctx, dir.path(), &["init", "--name", "other", "--force"]).unwrap();
        assert_eq!(run(&ctx, dir.path(), &["config", "get", "env_name"]).unwrap().trim(), "other");
    }
}
