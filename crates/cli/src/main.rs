//! skillrun CLI entry point.
//!
//! Commands:
//! - `chat`: Interactive chat or single-message mode
//! - `serve`: Start the HTTP gateway
//! - `tools`: Print the exported tool schemas
//! - `skills`: List the skills found on disk

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "skillrun",
    about = "skillrun: LLM tool orchestration with skills and a scripting sandbox",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.skillrun/config.toml)
    #[arg(short, long, global = true, env = "SKILLRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the tool schemas sent to the model
    Tools,

    /// List available skills
    Skills,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "skillrun=debug" } else { "skillrun=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat { message } => commands::chat::run(config, message).await?,
        Commands::Serve { host, port } => commands::serve::run(config, host, port).await?,
        Commands::Tools => commands::tools::run(&config)?,
        Commands::Skills => commands::skills::run(&config)?,
    }

    Ok(())
}
