use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use client::network::{ClientError, LeaderboardClient};
use log::{info, warn};
use rand::Rng;
use shared::{ErrorKind, PlayerId, DEFAULT_HISTORY_LIMIT, DEFAULT_TOP_N};
use std::time::Duration;

const SEED_PLAYERS: [&str; 8] = [
    "Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace", "Heidi",
];
const SEED_SUBMISSIONS: usize = 5;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(
        short = 's',
        long,
        env = "LEADERBOARD_SERVER",
        default_value = "127.0.0.1:8080"
    )]
    server: String,

    /// How long to wait for each response, in milliseconds
    #[arg(short = 't', long, env = "LEADERBOARD_TIMEOUT_MS", default_value = "2000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new player
    Register { name: String, contact: String },
    /// Submit a score for a player
    Submit { player_id: u64, score: u64 },
    /// Show the top of the leaderboard
    Top {
        #[arg(short, long, default_value_t = DEFAULT_TOP_N)]
        n: u32,
    },
    /// Show a player's profile, best score and rank
    Player { player_id: u64 },
    /// Show a player's most recent submissions
    History {
        player_id: u64,
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: u32,
    },
    /// Rebuild the server's rank index from the best records
    Rebuild,
    /// Register demo players and submit random scores for them
    Seed,
}

fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn seed(client: &mut LeaderboardClient) -> Result<(), ClientError> {
    let mut rng = rand::thread_rng();

    for name in SEED_PLAYERS {
        let contact = format!("{}@example.com", name.to_lowercase());
        let player_id = match client.register(name, &contact).await {
            Ok(player_id) => player_id,
            Err(e) if e.server_kind() == Some(ErrorKind::Conflict) => {
                warn!("{} is already registered, skipping", contact);
                continue;
            }
            Err(e) => return Err(e),
        };

        for _ in 0..SEED_SUBMISSIONS {
            let score = rng.gen_range(0..10_000);
            client.submit_score(player_id, score).await?;
        }
        println!("Seeded {} as player {}", name, player_id);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client =
        LeaderboardClient::new(&args.server, Duration::from_millis(args.timeout_ms)).await?;
    info!("Connected to: {}", client.server_addr());

    match args.command {
        Command::Register { name, contact } => {
            let player_id = client.register(&name, &contact).await?;
            println!("Registered {} as player {}", name, player_id);
        }

        Command::Submit { player_id, score } => {
            let receipt = client.submit_score(PlayerId(player_id), score).await?;
            println!(
                "Recorded event {} ({})",
                receipt.event_id,
                if receipt.improved {
                    "new best"
                } else {
                    "best unchanged"
                }
            );
        }

        Command::Top { n } => {
            let rows = client.top(n).await?;
            if rows.is_empty() {
                println!("No ranked players yet");
            }
            for row in rows {
                println!(
                    "{:>4}. {:<20} {:>10}  player {}  {}",
                    row.rank,
                    row.name,
                    row.score,
                    row.player_id,
                    format_timestamp(row.last_updated)
                );
            }
        }

        Command::Player { player_id } => {
            let profile = client.player(PlayerId(player_id)).await?;
            println!("Player {}: {} <{}>", profile.player_id, profile.name, profile.contact);
            match (profile.summary.best_score, profile.summary.rank) {
                (Some(score), Some(rank)) => {
                    println!("Best score: {} (rank {})", score, rank);
                }
                (Some(score), None) => println!("Best score: {} (not ranked yet)", score),
                _ => println!("No scores submitted"),
            }
            if let Some(t) = profile.summary.last_updated {
                println!("Reached at: {}", format_timestamp(t));
            }
        }

        Command::History { player_id, limit } => {
            let history = client.history(PlayerId(player_id), limit).await?;
            println!("History of {} (player {})", history.name, history.player_id);
            for item in history.items {
                println!("{:>10}  {}", item.score, format_timestamp(item.created_at));
            }
        }

        Command::Rebuild => {
            let entries = client.rebuild_index().await?;
            println!("Rank index rebuilt with {} entries", entries);
        }

        Command::Seed => seed(&mut client).await?,
    }

    Ok(())
}
