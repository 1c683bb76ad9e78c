//! Performance benchmarks for the ranking hot paths

use rand::Rng;
use server::encoding::EncodedKey;
use server::rank_index::{RankIndex, TreapRankIndex};
use server::store::{RankedScoreStore, StoreConfig};
use shared::PlayerId;
use std::time::Instant;

const PLAYERS: u64 = 50_000;

fn populated_index() -> TreapRankIndex {
    let mut rng = rand::thread_rng();
    let index = TreapRankIndex::new();
    for id in 0..PLAYERS {
        let key = EncodedKey::encode(rng.gen_range(0..1_000_000), 1_700_000_000_000 + id);
        index.upsert(PlayerId(id), key).unwrap();
    }
    index
}

/// Benchmarks inserting and replacing index entries
#[test]
fn benchmark_index_upsert() {
    let mut rng = rand::thread_rng();
    let index = TreapRankIndex::new();

    let iterations = 100_000u64;
    let start = Instant::now();

    for i in 0..iterations {
        // half the writes replace an existing player's entry
        let player = PlayerId(i % (iterations / 2));
        let key = EncodedKey::encode(rng.gen_range(0..1_000_000), i);
        index.upsert(player, key).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Index upsert: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(index.len().unwrap(), (iterations / 2) as usize);
    // Should complete in under 5 seconds even in debug builds
    assert!(duration.as_secs() < 5);
}

/// Benchmarks rank lookups on a populated index
#[test]
fn benchmark_rank_of() {
    let index = populated_index();
    let mut rng = rand::thread_rng();

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let player = PlayerId(rng.gen_range(0..PLAYERS));
        assert!(index.rank_of(player).unwrap().is_some());
    }

    let duration = start.elapsed();
    println!(
        "Rank lookup over {} players: {} iterations in {:?} ({:.2} μs/iter)",
        PLAYERS,
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks top-N reads on a populated index
#[test]
fn benchmark_top_n() {
    let index = populated_index();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let top = index.top_n(100).unwrap();
        assert_eq!(top.len(), 100);
    }

    let duration = start.elapsed();
    println!(
        "Top 100 over {} players: {} iterations in {:?} ({:.2} μs/iter)",
        PLAYERS,
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks full submissions through the in-memory store
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn benchmark_store_submissions() {
    let store = std::sync::Arc::new(RankedScoreStore::open(StoreConfig::in_memory()).await.unwrap());

    let mut players = Vec::new();
    for i in 0..100 {
        let player = store
            .register_player(&format!("Bench{}", i), &format!("bench{}", i))
            .await
            .unwrap();
        players.push(player.id);
    }

    let per_player = 200u64;
    let start = Instant::now();

    let mut handles = Vec::new();
    for player_id in players {
        let store = std::sync::Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for score in 0..per_player {
                store
                    .submit_score(player_id, score, 1_700_000_000_000 + score)
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let duration = start.elapsed();
    let total = 100 * per_player;
    println!(
        "Store submissions: {} in {:?} ({:.2} μs/submission)",
        total,
        duration,
        duration.as_micros() as f64 / total as f64
    );

    let top = store.top_n(100).await.unwrap();
    assert_eq!(top.len(), 100);
    assert!(top.iter().all(|row| row.score == per_player - 1));
    assert!(duration.as_secs() < 10);
}
