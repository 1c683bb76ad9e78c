//! Per-player best score records.
//!
//! Best records are never journaled on their own. They are a pure function
//! of the ledger, so replaying every logged score through
//! [`BestRecords::update_if_better`] in append order restores them exactly.

use log::debug;
use shared::{BestRecord, PlayerId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotImproved,
}

type Cell = Arc<Mutex<Option<BestRecord>>>;

/// Best score and first-reached timestamp of every player.
///
/// Each player owns a cell with its own lock, so the compare-and-write in
/// [`BestRecords::update_if_better`] is atomic per player while different
/// players never wait on each other. The outer map lock is only held long
/// enough to find a cell.
#[derive(Debug, Default)]
pub struct BestRecords {
    cells: RwLock<HashMap<PlayerId, Cell>>,
}

impl BestRecords {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, player_id: PlayerId) -> Cell {
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&player_id)
        {
            return Arc::clone(cell);
        }

        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cells.entry(player_id).or_default())
    }

    pub async fn get(&self, player_id: PlayerId) -> Option<BestRecord> {
        let cell = {
            let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
            cells.get(&player_id).cloned()
        }?;
        let best = *cell.lock().await;
        best
    }

    /// Replaces the record if `score` is strictly greater than the stored
    /// best. A missing record counts as lower than any score. Equal scores
    /// keep the earlier timestamp.
    pub async fn update_if_better(
        &self,
        player_id: PlayerId,
        score: u64,
        achieved_at: u64,
    ) -> UpdateOutcome {
        let cell = self.cell(player_id);
        let mut current = cell.lock().await;

        if matches!(*current, Some(best) if score <= best.score) {
            return UpdateOutcome::NotImproved;
        }

        *current = Some(BestRecord { score, achieved_at });

        debug!("Player {} improved best to {}", player_id, score);
        UpdateOutcome::Updated
    }

    /// Every player that has a best record.
    pub async fn snapshot(&self) -> Vec<(PlayerId, BestRecord)> {
        let cells: Vec<(PlayerId, Cell)> = {
            let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
            cells
                .iter()
                .map(|(id, cell)| (*id, Arc::clone(cell)))
                .collect()
        };

        let mut records = Vec::with_capacity(cells.len());
        for (player_id, cell) in cells {
            if let Some(best) = *cell.lock().await {
                records.push((player_id, best));
            }
        }
        records
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
