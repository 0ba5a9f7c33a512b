mod cmd;
mod instrument;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "scopehub",
    about = "Instrument control agent: run microscope actions and serve their events",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./scopehub.yaml, defaults if absent)
    #[arg(long, global = true, env = "SCOPEHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP/SSE API
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides server.port)
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },

    /// List registered actions
    Actions {
        /// Only actions carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Run one action in-process and wait for it to finish
    Run {
        /// Action name
        action: String,
        /// Arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Cancel after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Serve { host, port } => cmd::serve::run(config, host, port),
        Commands::Actions { tag } => cmd::actions::run(tag.as_deref(), cli.json),
        Commands::Run {
            action,
            args,
            timeout_ms,
        } => cmd::run::run(config, &action, args.as_deref(), timeout_ms, cli.json),
        Commands::Config => cmd::config::run(config, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
