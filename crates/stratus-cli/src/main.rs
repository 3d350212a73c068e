//! stratus CLI
//!
//! Upgrades and inspects stratus instances.

use std::process::ExitCode;

use clap::Parser;
use stratus_cli::Cli;
use stratus_common::telemetry::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
