//! Cinestream CLI - Command-line interface
//!
//! Starts the streaming server in production or development mode.

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "cinestream")]
#[command(about = "Play-while-downloading media server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::handle_command(cli.command).await
}
