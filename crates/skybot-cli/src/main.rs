mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Skybot -- keeps a fixed pool of game-server connections alive.
#[derive(Parser, Debug)]
#[command(name = "skybot", version, about)]
struct Cli {
    /// Daemon config file (default: ~/.skybot/daemon.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default daemon.toml
    Init,

    /// Run the daemon in the foreground
    Run,

    /// Start the daemon in the background
    Start,

    /// Ask a running daemon to shut down
    Stop,

    /// Show daemon health and every slot
    Status,

    /// Show the buffered log of one slot
    Logs {
        /// Slot index
        slot: usize,
    },

    /// Occupy an empty slot and connect it to a server
    Launch {
        /// Slot index
        slot: usize,

        /// Server address as host:port
        endpoint: String,

        /// Identity the slot is bound to
        #[arg(long)]
        owner: String,
    },

    /// Point an occupied slot at a different server
    Edit {
        /// Slot index
        slot: usize,

        /// New server address as host:port
        endpoint: String,

        /// Identity that launched the slot
        #[arg(long)]
        owner: String,
    },

    /// Disconnect and release a slot
    Cancel {
        /// Slot index
        slot: usize,

        /// Identity that launched the slot
        #[arg(long)]
        owner: String,
    },

    /// Send a line of text to an online slot
    Send {
        /// Slot index
        slot: usize,

        /// Text to send
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug for connection-level detail
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::daemon::init(config),
        Commands::Run => commands::daemon::run(config),
        Commands::Start => commands::daemon::start(config),
        Commands::Stop => commands::daemon::stop(config),
        Commands::Status => commands::daemon::status(config),
        Commands::Logs { slot } => commands::slots::logs(config, slot),
        Commands::Launch {
            slot,
            endpoint,
            owner,
        } => commands::slots::launch(config, slot, &endpoint, &owner),
        Commands::Edit {
            slot,
            endpoint,
            owner,
        } => commands::slots::edit(config, slot, &endpoint, &owner),
        Commands::Cancel { slot, owner } => commands::slots::cancel(config, slot, &owner),
        Commands::Send { slot, text } => commands::slots::send(config, slot, &text.join(" ")),
    }
}
