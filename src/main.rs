mod batch;
mod cli;
mod config;
mod discover;
mod download;
mod error;
mod fits;
mod index;
mod normalize;
mod slot;
#[cfg(test)]
mod test_support;

use std::process::ExitCode;

use clap::Parser;
use cli::{command, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Fetch(args) => command::fetch(&args.config()).await.map(|report| {
            println!("Discovery: {}", report.discovery);
            println!("Download: {}", report.download);
        }),
        Commands::Normalize(args) => command::normalize(&args.config())
            .await
            .map(|summary| println!("Normalization: {}", summary)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
