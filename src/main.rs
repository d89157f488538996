use clap::Parser;
use rill::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    rill::cli::run(cli).await
}
