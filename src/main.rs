mod archive;
mod cli;
mod config;
mod model;
mod sync;
mod tracker;
mod util;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Before parsing, so clap's env fallbacks see the file's variables
    let env_file = config::load_env_file(Path::new(config::ENV_FILE));
    let cli = Cli::parse();

    // Logs go to stderr so history listings on stdout stay clean
    let default_filter = if cli.verbose {
        "info,redmine_fetch=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = env_file {
        warn!("{e}");
    }

    match cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
