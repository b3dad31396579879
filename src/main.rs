//! Binary entrypoint for the `envops` CLI.

use std::process::ExitCode;

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    envops::logging::init();

    // Recording is handled in commands::dispatch via ENVOPS_RECORD=<dir>.
    match envops::run(std::env::args()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
