//! Player directory: identity and contact details of registered players.

use crate::error::StoreError;
use crate::journal::{Journal, JournalRecord};
use log::info;
use shared::{Player, PlayerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Roster {
    by_id: HashMap<PlayerId, Player>,
    by_contact: HashMap<String, PlayerId>,
}

impl Roster {
    fn insert(&mut self, player: Player) {
        self.by_contact.insert(player.contact.clone(), player.id);
        self.by_id.insert(player.id, player);
    }
}

/// Registered players. Players are never removed.
#[derive(Debug)]
pub struct PlayerDirectory {
    roster: RwLock<Roster>,
    next_id: AtomicU64,
    // Serializes registrations so the contact uniqueness check and the
    // journal write happen together.
    registration: Mutex<()>,
    journal: Journal,
}

impl PlayerDirectory {
    pub fn new(journal: Journal) -> Self {
        Self {
            roster: RwLock::new(Roster::default()),
            next_id: AtomicU64::new(1),
            registration: Mutex::new(()),
            journal,
        }
    }

    pub fn restore(&self, player: Player) {
        self.next_id.fetch_max(player.id.0 + 1, Ordering::Relaxed);
        self.roster
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player);
    }

    /// Registers a new player. Contacts must be unique.
    pub async fn register(&self, name: &str, contact: &str) -> Result<Player, StoreError> {
        let _registration = self.registration.lock().await;

        if self.find_by_contact(contact).is_some() {
            return Err(StoreError::DuplicateContact(contact.to_string()));
        }

        let player = Player {
            id: PlayerId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            contact: contact.to_string(),
        };
        self.journal
            .append(&JournalRecord::PlayerRegistered(player.clone()))
            .await?;

        self.roster
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player.clone());

        info!("Registered player {} ({})", player.id, player.name);
        Ok(player)
    }

    pub fn get(&self, player_id: PlayerId) -> Option<Player> {
        self.roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&player_id)
            .cloned()
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .contains_key(&player_id)
    }

    pub fn find_by_contact(&self, contact: &str) -> Option<PlayerId> {
        self.roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_contact
            .get(contact)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
