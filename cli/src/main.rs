//! Strata CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use strata_cli::commands::{dispatch, load_config, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over -v, -v wins over the config file
    let default_level = match cli.verbose {
        0 => config.log_level.as_str(),
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = dispatch(cli.command, &config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
