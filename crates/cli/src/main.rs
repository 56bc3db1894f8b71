mod cli;
mod commands;
mod error;
mod logging;
mod urls;

use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    if let Err(e) = logging::init(cli.verbose, cli.json) {
        eprintln!("freeze: {}", &*e);
        return ExitCode::FAILURE;
    }
    match commands::dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "Command failed");
            ExitCode::FAILURE
        },
    }
}
