//! # Leaderboard Server Library
//!
//! This library provides the ranked score store behind the leaderboard service
//! and the UDP server that exposes it. Players register once, submit scores
//! any number of times, and the store keeps three views of that data in step.
//!
//! ## Core Responsibilities
//!
//! ### Score Ledger
//! Every submission is appended to a per-player ledger and never changed
//! afterwards. The ledger is the source of truth for score history.
//!
//! ### Best Records
//! Each player has at most one best record: the highest score they ever
//! submitted and the time it was first reached. Updates are conditional
//! and only replace the record on a strict improvement.
//!
//! ### Rank Index
//! An ordered index over encoded best records answers top-N and
//! rank-of-player queries without scanning every player. The index is a
//! derived view and may lag behind the best records after a failed write;
//! reads repair it and a periodic reconciler retries queued repairs.
//!
//! ## Module Organization
//!
//! ### Encoding Module (`encoding`)
//! Packs a best score and its timestamp into one ordered integer key:
//! - Higher scores sort first
//! - Equal scores sort by earlier timestamp
//!
//! ### Rank Index Module (`rank_index`)
//! The [`rank_index::RankIndex`] trait and an order-statistic treap
//! implementation with logarithmic upsert, remove and rank queries.
//!
//! ### Journal Module (`journal`)
//! Length-prefixed bincode records appended to a single file by a
//! background writer task. Replayed on startup to restore state.
//!
//! ### Store Module (`store`)
//! [`store::RankedScoreStore`] coordinates players, ledger, best records
//! and index, serializing submissions per player.
//!
//! ### Network Module (`network`)
//! UDP request/response transport:
//! - Packet deserialization and dispatch
//! - One task per request against the shared store
//! - Periodic index reconciliation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::store::{RankedScoreStore, StoreConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(RankedScoreStore::open(StoreConfig::durable("data")).await?);
//!
//!     let mut server = Server::new("127.0.0.1:8080", store, Duration::from_secs(5)).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server runs a handful of internal tasks:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Drains the outgoing packet queue
//! - **Reconciler**: Retries rank index repairs that failed earlier
//! - **Request Tasks**: One per request, answering from the store

pub mod best_record;
pub mod encoding;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod network;
pub mod players;
pub mod rank_index;
pub mod store;
