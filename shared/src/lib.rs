//! Types and wire protocol shared by the leaderboard server and its clients.
//!
//! Every request carries a `request_id` that the server echoes back in the
//! matching response, so a client can multiplex requests over one UDP socket.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_TOP_N: u32 = 10;
pub const MAX_TOP_N: u32 = 100;
pub const DEFAULT_HISTORY_LIMIT: u32 = 10;
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Display name length in characters. Bounds every leaderboard response to
/// one datagram.
pub const MIN_NAME_LEN: usize = 1;
pub const MAX_NAME_LEN: usize = 100;
pub const MIN_CONTACT_LEN: usize = 3;
pub const MAX_CONTACT_LEN: usize = 255;

/// Largest payload that fits in a single UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Opaque player identifier assigned by the server at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a score event in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub contact: String,
}

/// One submitted score. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub id: EventId,
    pub player_id: PlayerId,
    pub score: u64,
    /// Milliseconds since the Unix epoch.
    pub achieved_at: u64,
}

/// Best score of a player and when it was first reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestRecord {
    pub score: u64,
    pub achieved_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    /// 1-based
    pub rank: u64,
    pub player_id: PlayerId,
    pub name: String,
    pub score: u64,
    pub last_updated: u64,
}

/// Ranking state of a single player. All fields are `None` until the
/// player submits a first score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub rank: Option<u64>,
    pub best_score: Option<u64>,
    pub last_updated: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub player_id: PlayerId,
    pub name: String,
    pub contact: String,
    pub summary: PlayerSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub score: u64,
    pub created_at: u64,
}

impl From<&ScoreEvent> for HistoryItem {
    fn from(event: &ScoreEvent) -> Self {
        Self {
            score: event.score,
            created_at: event.achieved_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    // Requests
    RegisterPlayer {
        request_id: u32,
        name: String,
        contact: String,
    },
    SubmitScore {
        request_id: u32,
        player_id: PlayerId,
        score: u64,
    },
    GetTop {
        request_id: u32,
        n: u32,
    },
    GetPlayer {
        request_id: u32,
        player_id: PlayerId,
    },
    GetHistory {
        request_id: u32,
        player_id: PlayerId,
        limit: u32,
    },
    RebuildIndex {
        request_id: u32,
    },

    // Responses
    PlayerRegistered {
        request_id: u32,
        player_id: PlayerId,
    },
    ScoreSubmitted {
        request_id: u32,
        event_id: EventId,
        improved: bool,
    },
    Leaderboard {
        request_id: u32,
        total: u64,
        rows: Vec<LeaderboardRow>,
    },
    Profile {
        request_id: u32,
        profile: PlayerProfile,
    },
    History {
        request_id: u32,
        player_id: PlayerId,
        name: String,
        items: Vec<HistoryItem>,
    },
    IndexRebuilt {
        request_id: u32,
        entries: u64,
    },
    Error {
        request_id: u32,
        kind: ErrorKind,
        message: String,
    },
}

impl Packet {
    pub fn request_id(&self) -> u32 {
        match self {
            Packet::RegisterPlayer { request_id, .. }
            | Packet::SubmitScore { request_id, .. }
            | Packet::GetTop { request_id, .. }
            | Packet::GetPlayer { request_id, .. }
            | Packet::GetHistory { request_id, .. }
            | Packet::RebuildIndex { request_id }
            | Packet::PlayerRegistered { request_id, .. }
            | Packet::ScoreSubmitted { request_id, .. }
            | Packet::Leaderboard { request_id, .. }
            | Packet::Profile { request_id, .. }
            | Packet::History { request_id, .. }
            | Packet::IndexRebuilt { request_id, .. }
            | Packet::Error { request_id, .. } => *request_id,
        }
    }

    /// Returns true for packets a client sends to the server.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Packet::RegisterPlayer { .. }
                | Packet::SubmitScore { .. }
                | Packet::GetTop { .. }
                | Packet::GetPlayer { .. }
                | Packet::GetHistory { .. }
                | Packet::RebuildIndex { .. }
        )
    }
}

/// Checks registration fields against the length limits, counting
/// characters after trimming surrounding whitespace.
pub fn validate_registration(name: &str, contact: &str) -> Result<(), String> {
    let name_len = name.trim().chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&name_len) {
        return Err(format!(
            "name must be {} to {} characters, got {}",
            MIN_NAME_LEN, MAX_NAME_LEN, name_len
        ));
    }

    let contact_len = contact.trim().chars().count();
    if !(MIN_CONTACT_LEN..=MAX_CONTACT_LEN).contains(&contact_len) {
        return Err(format!(
            "contact must be {} to {} characters, got {}",
            MIN_CONTACT_LEN, MAX_CONTACT_LEN, contact_len
        ));
    }

    Ok(())
}

/// Clamps a requested page size into `1..=max`.
pub fn clamp_limit(requested: u32, max: u32) -> u32 {
    requested.clamp(1, max)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
