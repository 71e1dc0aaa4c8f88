mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> error::Result<()> {
    let cli = cli::Cli::parse();

    init_logging(&cli.log)?;

    commands::run(cli)
}

/// Logs to stderr so that command output on stdout stays machine readable.
fn init_logging(log: &[String]) -> error::Result<()> {
    let filter = if log.is_empty() {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))
    } else {
        EnvFilter::try_new(log.join(","))
    }
    .map_err(|err| error::Error::Logging(err.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| error::Error::Logging(err.to_string()))
}
