//! # Leaderboard Client Library
//!
//! This library provides the client side of the leaderboard protocol. It
//! wraps a UDP socket in a small request/response API so callers can
//! register players, submit scores and query rankings without handling
//! packets directly.
//!
//! ## Protocol
//!
//! Every request carries a request id chosen by the client, and the server
//! echoes it in the response. The client waits for the matching id until a
//! configurable timeout elapses. Answers to earlier, abandoned requests are
//! discarded.
//!
//! Errors reported by the server arrive as [`shared::Packet::Error`] and are
//! surfaced as [`network::ClientError::Server`] with the server's error kind.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::LeaderboardClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = LeaderboardClient::new("127.0.0.1:8080", Duration::from_secs(2)).await?;
//!
//!     let alice = client.register("Alice", "alice@example.com").await?;
//!     client.submit_score(alice, 1200).await?;
//!
//!     for row in client.top(10).await? {
//!         println!("#{} {} {}", row.rank, row.name, row.score);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod network;
