//! Markten CLI: run recipes over every permutation of their parameters.

use clap::Parser;
use markten::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = markten::cli::dispatch(cli.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
