use anyhow::Result;
use clap::{Parser, Subcommand};

use spacedock::{orchestrator, shared};

#[derive(Parser)]
#[command(name = "spacedock")]
#[command(about = "Distributed container orchestrator for model demo services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestration loops (controller health sweep, service monitors)
    Operator,

    /// Print a one-shot summary of the controller fleet
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = shared::logging::init_logging("./logs", "spacedock");

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Operator) {
        Commands::Operator => orchestrator::run().await?,
        Commands::Status => orchestrator::status().await?,
    }

    Ok(())
}
