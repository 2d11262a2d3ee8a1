//! pilot: single-action browser automation agent
//!
//! Drives a local Chromium window towards a natural-language goal, one model
//! chosen action at a time, using a local Ollama server.

mod agent;
mod commands;
mod observe;
mod tools;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pilot")]
#[command(about = "Goal-driven browser automation with a local LLM", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to pilot.toml (searched upwards from the working directory by default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ollama server URL (overrides config)
    #[arg(long, global = true, env = "OLLAMA_URL")]
    ollama_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Work towards a goal in the browser
    Run {
        /// The goal, in plain language
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,

        /// Model to use (overrides config)
        #[arg(short, long, env = "AGENT_MODEL")]
        model: Option<String>,

        /// Maximum number of steps
        #[arg(long)]
        max_steps: Option<usize>,

        /// Run the browser without a window
        #[arg(long)]
        headless: bool,

        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show Ollama status and installed models
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            goal,
            model,
            max_steps,
            headless,
            json,
        } => {
            let options = commands::RunOptions {
                goal: goal.join(" "),
                ollama_url: cli.ollama_url,
                model,
                max_steps,
                headless,
                json,
            };
            commands::run(&config, options).await
        }
        Commands::Status => commands::status(&config, cli.ollama_url).await,
    }
}
