//! Operator tool for a slotkeeper data directory.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;

use slotkeeper::cli::{self, CliArgs, Outcome};
use slotkeeper::config::Config;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = CliArgs::parse();
    slotkeeper::observability::init_tracing("warn");

    let config = Config::from_env();
    let outcome = cli::run(args.command, &config, &mut std::io::stdout()).await?;
    Ok(match outcome {
        Outcome::Clean => ExitCode::SUCCESS,
        Outcome::Flagged => ExitCode::FAILURE,
    })
}
