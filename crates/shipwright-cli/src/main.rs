mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{audit::AuditSubcommand, config::ConfigSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shipwright",
    about = "Self-update controller: pull, rebuild, migrate, and roll back a compose deployment",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .shipwright/)
    #[arg(long, global = true, env = "SHIPWRIGHT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP update controller
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "7878", env = "SHIPWRIGHT_PORT")]
        port: u16,
    },

    /// Run one update attempt in this process and wait for it to finish
    Run {
        /// Actor recorded on the audit record (default: $USER)
        #[arg(long = "as", value_name = "ACTOR")]
        actor: Option<String>,
    },

    /// Show the live status of a running controller
    Status {
        /// Base URL of the controller
        #[arg(long, default_value = "http://localhost:7878", env = "SHIPWRIGHT_URL")]
        url: String,
    },

    /// Inspect the audit trail
    Audit {
        #[command(subcommand)]
        subcommand: AuditSubcommand,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Run { actor } => cmd::run::run(&root, actor, cli.json),
        Commands::Status { url } => cmd::status::run(&url, cli.json),
        Commands::Audit { subcommand } => cmd::audit::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
