use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod replica;
mod scenario;

use commands::{fanout, stream};

/// Replay replicated reads against simulated replicas
#[derive(Parser)]
#[command(name = "shardread-sim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output, including quorum decisions
    #[arg(short, long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fan a request out to the replicas of a scenario
    Fanout(fanout::FanoutArgs),
    /// Stream series from simulated replicas and merge them
    Stream(stream::StreamArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "shardread_core=debug,shardread_sim=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "shardread_core=error,shardread_sim=error".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let output = commands::OutputContext {
        json: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Fanout(args) => fanout::execute(args, &output).await,
        Commands::Stream(args) => stream::execute(args, &output).await,
    }
}
