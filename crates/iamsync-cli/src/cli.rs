use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "iamsync",
    about = "iamsync: converge declared IAM objects onto the identity service",
    version
)]
pub struct Cli {
    /// Log output format (filter with RUST_LOG)
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where state lives and how the remote side is addressed.
#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// State directory holding objects.jsonl and remote.json
    #[arg(long, default_value = ".iamsync")]
    pub state_dir: String,

    /// TOML config with [remote] and [controller] tables
    /// (defaults to ./iamsync.toml when present)
    #[arg(long)]
    pub config: Option<String>,

    /// Override remote.region
    #[arg(long)]
    pub region: Option<String>,

    /// Override remote.account_id
    #[arg(long)]
    pub account_id: Option<String>,

    /// Override remote.resource_prefix
    #[arg(long)]
    pub resource_prefix: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Declare or refresh the objects in a manifest, then converge
    Apply {
        /// Manifest JSONL, one object per line
        manifest: String,

        #[command(flatten)]
        state: StateArgs,

        /// Give up converging after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Request deletion of the objects in a manifest, then converge
    Delete {
        /// Manifest JSONL; only kind, namespace and name are used
        manifest: String,

        #[command(flatten)]
        state: StateArgs,

        /// Give up converging after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report the convergence phase of every declared object
    Status {
        #[command(flatten)]
        state: StateArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the canonical documents the engine would send for a manifest
    Render {
        /// Manifest JSONL, one object per line
        manifest: String,

        #[command(flatten)]
        state: StateArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
