use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerMessage};
use server::store::{RankedScoreStore, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, env = "LEADERBOARD_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, env = "LEADERBOARD_PORT", default_value = "8080")]
    port: u16,

    /// Directory holding the journal file
    #[arg(short, long, env = "LEADERBOARD_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Keep everything in memory and skip the journal
    #[arg(long, env = "LEADERBOARD_IN_MEMORY")]
    in_memory: bool,

    /// Sync the journal to disk after every batch of writes
    #[arg(long, env = "LEADERBOARD_SYNC_WRITES")]
    sync_writes: bool,

    /// Seconds between rank index reconciliation passes
    #[arg(
        short,
        long,
        env = "LEADERBOARD_RECONCILE_INTERVAL_SECS",
        default_value = "5"
    )]
    reconcile_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = if args.in_memory {
        StoreConfig::in_memory()
    } else {
        StoreConfig {
            sync_writes: args.sync_writes,
            ..StoreConfig::durable(&args.data_dir)
        }
    };

    info!("Starting leaderboard server...");
    match &config.data_dir {
        Some(dir) => info!("Journal directory: {}", dir.display()),
        None => info!("Running in memory, nothing will be persisted"),
    }

    let store = Arc::new(RankedScoreStore::open(config).await?);
    info!(
        "Store ready with {} ranked players",
        store.ranked_players()?
    );

    let address = format!("{}:{}", args.host, args.port);
    let reconcile_interval = Duration::from_secs(args.reconcile_interval_secs.max(1));
    let mut server = Server::new(&address, store, reconcile_interval).await?;
    let control = server.control();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server stopped with error: {}", e);
        }
    });

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    }

    Ok(())
}
