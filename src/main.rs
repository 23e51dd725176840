use anyhow::Result;
use clap::{Parser, Subcommand};

use wspipe::{client, listener};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Pipe your console through WebSocket peers."
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept connections and fan local input out to every peer.
    Listen(listener::Args),
    /// Dial a listener and bridge the local console to it.
    Connect(client::Args),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries relayed data, so diagnostics go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    match args.command {
        Commands::Listen(listen_args) => listener::run_listener(listen_args).await,
        Commands::Connect(connect_args) => client::run_client(connect_args).await,
    }
}
