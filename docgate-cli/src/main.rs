use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

/// docgate - JSON gateway for a document-store collection
#[derive(Parser)]
#[command(name = "docgate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Serve {
        /// Configuration file (defaults to ./docgate.toml when present)
        #[arg(short, long, env = "DOCGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve from an empty in-memory collection instead of the configured store
        #[arg(long)]
        memory: bool,
    },
    /// Print the effective configuration with secrets redacted
    Config {
        /// Configuration file (defaults to ./docgate.toml when present)
        #[arg(short, long, env = "DOCGATE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Connect to the configured store once and ping it
    Check {
        /// Configuration file (defaults to ./docgate.toml when present)
        #[arg(short, long, env = "DOCGATE_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            config,
            port,
            memory,
        } => commands::serve::execute(config, port, memory).await,
        Commands::Config { config } => commands::config::execute(config),
        Commands::Check { config } => commands::check::execute(config).await,
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}
