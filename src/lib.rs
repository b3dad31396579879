//! Core library entry for the `envops` CLI.
//!
//! `envops` keeps three views of a Python/conda environment in agreement:
//! the human-edited requirements, the machine-generated lock, and what the
//! runtime actually has installed.

pub mod adapters;
pub mod cassette;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod drift;
pub mod error;
pub mod lock;
pub mod logging;
pub mod plan;
pub mod ports;
pub mod reference;
pub mod report;
pub mod requirements;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

use clap::Parser;

/// Run the CLI with the provided arguments.
///
/// # Errors
///
/// Returns an error string when argument parsing fails or command execution fails.
pub fn run<I, T>(args: I) -> Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match cli::Cli::try_parse_from(args) {
        Ok(cli) => cli,
        // `--help` and `--version` are successful runs.
        Err(err) if !err.use_stderr() => {
            err.print().map_err(|e| e.to_string())?;
            return Ok(());
        }
        Err(err) => return Err(err.to_string()),
    };
    commands::dispatch(&cli.into_command())
}
