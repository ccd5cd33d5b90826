use std::process::ExitCode;

use clap::Parser;
use eval_upload_cli::cli::{cli, Cli};
use eval_upload_cli::logging::setup_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = setup_logging() {
        eprintln!("{}", e);
    }

    match cli(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
