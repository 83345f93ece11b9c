//! iamsync CLI: the `iamsync` command.

mod cli;
mod commands;
mod config;
mod support;

use clap::Parser;
use cli::{Cli, Commands, LogFormat};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Apply {
            manifest,
            state,
            timeout_secs,
            json,
        } => commands::apply::run(manifest, state, timeout_secs, json),

        Commands::Delete {
            manifest,
            state,
            timeout_secs,
            json,
        } => commands::delete::run(manifest, state, timeout_secs, json),

        Commands::Status { state, json } => commands::status::run(state, json),

        Commands::Render {
            manifest,
            state,
            json,
        } => commands::render::run(manifest, state, json),
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
