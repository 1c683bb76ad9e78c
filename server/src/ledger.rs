//! Append-only score ledger, the source of truth for score history.

use crate::error::StoreError;
use crate::journal::{Journal, JournalRecord};
use log::debug;
use shared::{EventId, PlayerId, ScoreEvent};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Every submitted score, grouped per player in append order.
///
/// Only registered players have an account here; appending for any other
/// id fails with [`StoreError::UnknownPlayer`]. No operation mutates or
/// deletes a recorded event.
#[derive(Debug)]
pub struct ScoreLedger {
    accounts: RwLock<HashMap<PlayerId, Vec<ScoreEvent>>>,
    next_event_id: AtomicU64,
    journal: Journal,
}

impl ScoreLedger {
    pub fn new(journal: Journal) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            next_event_id: AtomicU64::new(1),
            journal,
        }
    }

    /// Opens an empty account for a newly registered player.
    pub fn open_account(&self, player_id: PlayerId) {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(player_id)
            .or_default();
    }

    /// Re-applies an event read back from the journal.
    pub fn restore(&self, event: ScoreEvent) {
        self.next_event_id
            .fetch_max(event.id.0 + 1, Ordering::Relaxed);
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.player_id)
            .or_default()
            .push(event);
    }

    pub fn has_account(&self, player_id: PlayerId) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&player_id)
    }

    /// Durably records a submission and returns its event id.
    pub async fn append(
        &self,
        player_id: PlayerId,
        score: u64,
        achieved_at: u64,
    ) -> Result<EventId, StoreError> {
        if !self.has_account(player_id) {
            return Err(StoreError::UnknownPlayer(player_id));
        }

        let event = ScoreEvent {
            id: EventId(self.next_event_id.fetch_add(1, Ordering::Relaxed)),
            player_id,
            score,
            achieved_at,
        };
        self.journal
            .append(&JournalRecord::ScoreAppended(event.clone()))
            .await?;

        let id = event.id;
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(player_id)
            .or_default()
            .push(event);

        debug!("Ledger event {} recorded for player {}", id, player_id);
        Ok(id)
    }

    /// Returns up to `limit` events of the player, most recent first.
    ///
    /// Events are ordered by achieved-at time; equal times fall back to the
    /// event id, so later submissions come first.
    pub fn history(&self, player_id: PlayerId, limit: usize) -> Result<Vec<ScoreEvent>, StoreError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        let events = accounts
            .get(&player_id)
            .ok_or(StoreError::UnknownPlayer(player_id))?;

        let mut newest_first: Vec<&ScoreEvent> = events.iter().collect();
        newest_first.sort_by_key(|event| (Reverse(event.achieved_at), Reverse(event.id)));

        Ok(newest_first.into_iter().take(limit).cloned().collect())
    }

    /// Number of events recorded for the player.
    pub fn event_count(&self, player_id: PlayerId) -> usize {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&player_id)
            .map_or(0, Vec::len)
    }
}
