use std::process::ExitCode;

use clap::Parser;
use wallet_ledger::cli::{Cli, init_logging, report_error};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_error(&err),
    }
}
