mod commands;

use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dkorch")]
#[command(about = "dreamOS service orchestration and monitoring engine")]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root of the on-disk layout (overrides config and DK_CONTAINER_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll once and print services, resources and health
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the poller and deployment watcher until interrupted
    Monitor,

    /// Start a platform service
    Start {
        /// Service name (e.g., "sdv-runtime")
        name: String,
    },

    /// Stop a platform service
    Stop {
        /// Service name
        name: String,
    },

    /// List installed apps and services
    Apps,

    /// Search the cached marketplace results
    Search {
        /// Category term (defaults to "vehicle")
        #[arg(default_value = "")]
        term: String,
    },

    /// Install a package from a descriptor file or the marketplace results
    Install {
        /// Package descriptor JSON file
        #[arg(required_unless_present = "pick", conflicts_with = "pick")]
        file: Option<PathBuf>,

        /// Install result number <n> of `search`
        #[arg(long)]
        pick: Option<usize>,

        /// Search term used with --pick
        #[arg(long, default_value = "")]
        term: String,
    },

    /// Launch an installed app unless it is already open
    Launch {
        /// Position in the `apps` listing
        index: usize,
    },

    /// Remove an installed app or service
    Remove {
        /// Position in the `apps` listing
        index: usize,
    },

    /// List deployable prototypes
    Prototypes,

    /// Deploy a prototype and wait for it to come up
    Deploy {
        /// Prototype id
        id: String,

        /// Display name (defaults to the prototype list entry)
        name: Option<String>,
    },

    /// Stop a deployed prototype
    Kill {
        /// Prototype id
        id: String,
    },

    /// Run an allowed diagnostic command
    Console {
        /// Command line, e.g. "docker logs sdv-runtime"
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let args = Args::parse();
    let ctx = commands::Context::load(args.config.as_deref(), args.root)?;

    match args.command {
        Command::Status { json } => {
            commands::status(&ctx, json).await?;
        }
        Command::Monitor => {
            commands::monitor(&ctx).await?;
        }
        Command::Start { name } => {
            commands::start(&ctx, &name).await?;
        }
        Command::Stop { name } => {
            commands::stop(&ctx, &name).await?;
        }
        Command::Apps => {
            commands::apps(&ctx).await?;
        }
        Command::Search { term } => {
            commands::search(&ctx, &term).await?;
        }
        Command::Install { file, pick, term } => {
            commands::install(&ctx, file.as_deref(), pick, &term).await?;
        }
        Command::Launch { index } => {
            commands::launch(&ctx, index).await?;
        }
        Command::Remove { index } => {
            commands::remove(&ctx, index).await?;
        }
        Command::Prototypes => {
            commands::prototypes(&ctx).await?;
        }
        Command::Deploy { id, name } => {
            commands::deploy(&ctx, &id, name.as_deref()).await?;
        }
        Command::Kill { id } => {
            commands::kill(&ctx, &id).await?;
        }
        Command::Console { command } => {
            commands::console(&ctx, &command.join(" ")).await?;
        }
    }

    Ok(())
}
