//! The ranked score store: coordinates the ledger, the best records and the
//! rank index.
//!
//! Writes for one player are serialized by a per-player lock that covers the
//! ledger append, the best record compare-and-write and the matching rank
//! index upsert, so the index never points at a stale key after an
//! improvement. Different players never contend on that lock.
//!
//! The rank index is a cache. If writing it fails after the best record was
//! updated, the player is queued for repair and the submission still
//! succeeds; the entry is re-derived from the best record on the next read of
//! that player, on the next [`RankedScoreStore::repair_pending`] pass, or by a
//! full [`RankedScoreStore::rebuild_index`].

use crate::best_record::{BestRecords, UpdateOutcome};
use crate::encoding::EncodedKey;
use crate::error::StoreError;
use crate::journal::{Journal, JournalRecord};
use crate::ledger::ScoreLedger;
use crate::players::PlayerDirectory;
use crate::rank_index::{RankIndex, TreapRankIndex};
use log::{debug, info, warn};
use shared::{
    EventId, LeaderboardRow, Player, PlayerId, PlayerProfile, PlayerSummary, ScoreEvent,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub const JOURNAL_FILE_NAME: &str = "journal.bin";

/// Where and how the durable state is kept.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the journal. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// `fsync` the journal after every batch of writes.
    pub sync_writes: bool,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            sync_writes: false,
        }
    }

    pub fn durable(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            sync_writes: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionResult {
    pub event_id: EventId,
    /// True if the submission raised the player's best score.
    pub improved: bool,
}

/// One async mutex per player, created on first use.
#[derive(Debug, Default)]
struct PlayerLocks {
    locks: Mutex<HashMap<PlayerId, Arc<AsyncMutex<()>>>>,
}

impl PlayerLocks {
    async fn lock(&self, player_id: PlayerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(player_id).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct RankedScoreStore {
    players: PlayerDirectory,
    ledger: ScoreLedger,
    best: BestRecords,
    index: Arc<dyn RankIndex>,
    locks: PlayerLocks,
    pending_repair: Mutex<HashSet<PlayerId>>,
}

impl RankedScoreStore {
    /// Opens the store with the built-in treap index.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        Self::open_with_index(config, Arc::new(TreapRankIndex::new())).await
    }

    /// Opens the store, replaying the journal if one is configured, and
    /// loads `index` from the recovered best records.
    pub async fn open_with_index(
        config: StoreConfig,
        index: Arc<dyn RankIndex>,
    ) -> Result<Self, StoreError> {
        let (journal, records) = match &config.data_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                Journal::open(dir.join(JOURNAL_FILE_NAME), config.sync_writes).await?
            }
            None => (Journal::disabled(), Vec::new()),
        };

        let store = Self {
            players: PlayerDirectory::new(journal.clone()),
            ledger: ScoreLedger::new(journal),
            best: BestRecords::new(),
            index,
            locks: PlayerLocks::default(),
            pending_repair: Mutex::new(HashSet::new()),
        };

        for record in records {
            match record {
                JournalRecord::PlayerRegistered(player) => {
                    store.ledger.open_account(player.id);
                    store.players.restore(player);
                }
                JournalRecord::ScoreAppended(event) => {
                    store
                        .best
                        .update_if_better(event.player_id, event.score, event.achieved_at)
                        .await;
                    store.ledger.restore(event);
                }
            }
        }

        let loaded = store.reload_index().await?;
        info!(
            "Store opened: {} players, {} ranked",
            store.players.len(),
            loaded
        );
        Ok(store)
    }

    pub async fn register_player(&self, name: &str, contact: &str) -> Result<Player, StoreError> {
        let player = self.players.register(name, contact).await?;
        self.ledger.open_account(player.id);
        Ok(player)
    }

    pub fn player(&self, player_id: PlayerId) -> Option<Player> {
        self.players.get(player_id)
    }

    /// Records a score. The submission succeeds whether or not it improves
    /// the player's best; only the ranking side effect is conditional.
    pub async fn submit_score(
        &self,
        player_id: PlayerId,
        score: u64,
        achieved_at: u64,
    ) -> Result<SubmissionResult, StoreError> {
        if !self.players.contains(player_id) {
            return Err(StoreError::UnknownPlayer(player_id));
        }

        let _guard = self.locks.lock(player_id).await;

        let event_id = self.ledger.append(player_id, score, achieved_at).await?;
        let outcome = self
            .best
            .update_if_better(player_id, score, achieved_at)
            .await;

        let improved = outcome == UpdateOutcome::Updated;
        if improved {
            let key = EncodedKey::encode(score, achieved_at);
            if let Err(e) = self.index.upsert(player_id, key) {
                warn!(
                    "Rank index update for player {} failed, queued for repair: {}",
                    player_id, e
                );
                self.queue_repair(player_id);
            }
        }

        debug!(
            "Player {} submitted {} (event {}, improved: {})",
            player_id, score, event_id, improved
        );
        Ok(SubmissionResult { event_id, improved })
    }

    /// The best `n` players, hydrated with names.
    ///
    /// Ranks are 1-based positions in the index. Score and time come from
    /// the index key the row was ranked by, so rows always agree with their
    /// ranks; an entry that lags behind the player's best record is queued
    /// for repair. An index entry whose player cannot be found is skipped.
    pub async fn top_n(&self, n: usize) -> Result<Vec<LeaderboardRow>, StoreError> {
        let entries = self.index.top_n(n)?;
        let mut rows = Vec::with_capacity(entries.len());

        for (position, (player_id, key)) in entries.into_iter().enumerate() {
            let Some(player) = self.players.get(player_id) else {
                debug!("Skipping index entry for unknown player {}", player_id);
                continue;
            };

            let current = self.best.get(player_id).await.map(|b| EncodedKey::from_best(&b));
            if current != Some(key) {
                debug!("Index entry for player {} is stale", player_id);
                self.queue_repair(player_id);
            }

            rows.push(LeaderboardRow {
                rank: position as u64 + 1,
                player_id,
                name: player.name,
                score: key.score(),
                last_updated: key.achieved_at(),
            });
        }

        Ok(rows)
    }

    /// Rank and best score of one player. Rank is 1-based and absent while
    /// the player has no score.
    pub async fn player_summary(&self, player_id: PlayerId) -> Result<PlayerSummary, StoreError> {
        if !self.players.contains(player_id) {
            return Err(StoreError::UnknownPlayer(player_id));
        }

        let Some(best) = self.best.get(player_id).await else {
            return Ok(PlayerSummary::default());
        };

        let expected = EncodedKey::from_best(&best);
        if self.is_queued_for_repair(player_id) || self.index.key_of(player_id)? != Some(expected)
        {
            self.reconcile_player(player_id).await?;
        }

        let rank = self.index.rank_of(player_id)?.map(|r| r as u64 + 1);
        Ok(PlayerSummary {
            rank,
            best_score: Some(best.score),
            last_updated: Some(best.achieved_at),
        })
    }

    pub async fn profile(&self, player_id: PlayerId) -> Result<PlayerProfile, StoreError> {
        let player = self
            .players
            .get(player_id)
            .ok_or(StoreError::UnknownPlayer(player_id))?;
        let summary = self.player_summary(player_id).await?;

        Ok(PlayerProfile {
            player_id,
            name: player.name,
            contact: player.contact,
            summary,
        })
    }

    /// Most recent submissions of the player, newest first.
    pub fn history(&self, player_id: PlayerId, limit: usize) -> Result<Vec<ScoreEvent>, StoreError> {
        self.ledger.history(player_id, limit)
    }

    /// Number of players in the rank index.
    pub fn ranked_players(&self) -> Result<usize, StoreError> {
        Ok(self.index.len()?)
    }

    /// Re-derives one player's index entry from the best record.
    pub async fn reconcile_player(&self, player_id: PlayerId) -> Result<(), StoreError> {
        let _guard = self.locks.lock(player_id).await;

        let result = match self.best.get(player_id).await {
            Some(best) => self.index.upsert(player_id, EncodedKey::from_best(&best)),
            None => self.index.remove(player_id).map(|_| ()),
        };

        match result {
            Ok(()) => {
                self.pending_repair
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&player_id);
                Ok(())
            }
            Err(e) => {
                self.queue_repair(player_id);
                Err(e.into())
            }
        }
    }

    /// Re-derives every entry from the best records, one player at a time
    /// under that player's lock. Safe to run alongside live traffic and
    /// idempotent. Returns the number of ranked players afterwards.
    pub async fn rebuild_index(&self) -> Result<usize, StoreError> {
        for player_id in self.best.player_ids() {
            self.reconcile_player(player_id).await?;
        }

        let entries = self.index.len()?;
        info!("Rank index rebuilt with {} entries", entries);
        Ok(entries)
    }

    /// Replaces the whole index with entries derived from the best records.
    /// Meant for startup, before live traffic arrives.
    pub async fn reload_index(&self) -> Result<usize, StoreError> {
        let entries: Vec<(PlayerId, EncodedKey)> = self
            .best
            .snapshot()
            .await
            .into_iter()
            .map(|(player_id, best)| (player_id, EncodedKey::from_best(&best)))
            .collect();
        let count = entries.len();

        self.index.load(entries)?;
        self.pending_repair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(count)
    }

    /// Retries every queued repair. Returns how many succeeded.
    pub async fn repair_pending(&self) -> usize {
        let queued: Vec<PlayerId> = self
            .pending_repair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();

        let mut repaired = 0;
        for player_id in queued {
            match self.reconcile_player(player_id).await {
                Ok(()) => repaired += 1,
                Err(e) => warn!("Repair of player {} failed: {}", player_id, e),
            }
        }
        repaired
    }

    pub fn pending_repairs(&self) -> usize {
        self.pending_repair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn queue_repair(&self, player_id: PlayerId) {
        self.pending_repair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player_id);
    }

    fn is_queued_for_repair(&self, player_id: PlayerId) -> bool {
        self.pending_repair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&player_id)
    }
}
