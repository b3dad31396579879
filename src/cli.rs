//! CLI argument definitions.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI parser for `envops`.
#[derive(Debug, Parser)]
#[command(
    name = "envops",
    version,
    about = "Keep requirements, lock file, and environment in agreement"
)]
pub struct Cli {
    /// The command to execute; `status` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The requested command, with a bare invocation meaning `status`.
    #[must_use]
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Status { json: false })
    }
}

/// Package specs given to `add` and `install`.
#[derive(Debug, Args)]
pub struct AddArgs {
    /// Package specs, e.g. `numpy>=1.26` or `conda-forge::xarray`.
    #[arg(required_unless_present = "editable")]
    pub specs: Vec<String>,
    /// Channel for unqualified conda specs.
    #[arg(short, long)]
    pub channel: Option<String>,
    /// Treat the specs as pip requirements.
    #[arg(long, conflicts_with = "channel")]
    pub pip: bool,
    /// Local path to install in editable mode with pip.
    #[arg(short, long, requires = "pip")]
    pub editable: Vec<String>,
}

/// Supported top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create `.envops/` with a default configuration and requirements.
    Init {
        /// Environment name; defaults to the project directory name.
        #[arg(long)]
        name: Option<String>,
        /// Reinitialize an existing project.
        #[arg(long)]
        force: bool,
    },
    /// Report drift between requirements, lock, and environment.
    Status {
        /// Print the drift report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Declare packages in the requirements.
    Add(AddArgs),
    /// Remove packages from the requirements.
    Remove {
        /// Package names.
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Bring the lock and environment in line with the requirements.
    Sync {
        /// Print the plan without executing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// `add` followed by `sync`.
    Install(AddArgs),
    /// `remove` followed by `sync`.
    Uninstall {
        /// Package names.
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Regenerate the lock from the requirements.
    Lock,
    /// Delete the managed environment, keeping requirements and lock.
    Delete,
    /// Delete the environment and rebuild it from the lock.
    Clean,
    /// Inspect or edit the requirements document.
    Reqs {
        /// The requirements action.
        #[command(subcommand)]
        action: ReqsCommand,
    },
    /// Read or change project configuration.
    Config {
        /// The configuration action.
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

/// `envops reqs` actions.
#[derive(Debug, Subcommand)]
pub enum ReqsCommand {
    /// Print the requirements document.
    List,
    /// Open the requirements in `$VISUAL`/`$EDITOR` and validate the result.
    Edit,
    /// Validate the requirements document.
    Check,
}

/// `envops config` actions.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print one setting.
    Get {
        /// Dotted key, e.g. `solver.timeout_secs`.
        key: String,
    },
    /// Change one setting.
    Set {
        /// Dotted key.
        key: String,
        /// New value, parsed as a YAML scalar.
        value: String,
    },
    /// Print every setting.
    List,
}
