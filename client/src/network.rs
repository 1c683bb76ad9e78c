use bincode::{deserialize, serialize};
use log::{debug, warn};
use shared::{
    ErrorKind, EventId, HistoryItem, LeaderboardRow, Packet, PlayerId, PlayerProfile,
    MAX_DATAGRAM_SIZE,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve server address {0}")]
    UnresolvedAddress(String),
    #[error("no response from server within {0:?}")]
    Timeout(Duration),
    #[error("server error ({kind}): {message}")]
    Server { kind: ErrorKind, message: String },
    #[error("unexpected response to request {0}")]
    UnexpectedResponse(u32),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl ClientError {
    /// Error kind reported by the server, if the server answered with one.
    pub fn server_kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Server { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub event_id: EventId,
    pub improved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerHistory {
    pub player_id: PlayerId,
    pub name: String,
    pub items: Vec<HistoryItem>,
}

/// Request/response client for the leaderboard server.
///
/// One request is in flight at a time. Responses carrying a different
/// request id (late answers to requests that already timed out) are dropped.
pub struct LeaderboardClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    next_request_id: u32,
    timeout: Duration,
}

impl LeaderboardClient {
    pub async fn new(server_addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let server_addr = lookup_host(server_addr)
            .await?
            .next()
            .ok_or_else(|| ClientError::UnresolvedAddress(server_addr.to_string()))?;

        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(LeaderboardClient {
            socket,
            server_addr,
            next_request_id: 1,
            timeout,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends `packet` and waits for the response with the same request id.
    async fn request(&mut self, build: impl FnOnce(u32) -> Packet) -> Result<Packet, ClientError> {
        let request_id = self.next_request_id();
        let packet = build(request_id);
        self.send_packet(&packet).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buffer))
                .await
                .map_err(|_| ClientError::Timeout(self.timeout))?;
            let (len, addr) = received?;

            if addr != self.server_addr {
                warn!("Ignoring packet from unknown sender {}", addr);
                continue;
            }

            let Ok(response) = deserialize::<Packet>(&buffer[0..len]) else {
                warn!("Failed to deserialize packet from server");
                continue;
            };

            if response.request_id() != request_id {
                debug!(
                    "Dropping stale response {} while waiting for {}",
                    response.request_id(),
                    request_id
                );
                continue;
            }

            return match response {
                Packet::Error { kind, message, .. } => Err(ClientError::Server { kind, message }),
                response => Ok(response),
            };
        }
    }

    pub async fn register(&mut self, name: &str, contact: &str) -> Result<PlayerId, ClientError> {
        let response = self
            .request(|request_id| Packet::RegisterPlayer {
                request_id,
                name: name.to_string(),
                contact: contact.to_string(),
            })
            .await?;

        match response {
            Packet::PlayerRegistered { player_id, .. } => Ok(player_id),
            other => Err(ClientError::UnexpectedResponse(other.request_id())),
        }
    }

    pub async fn submit_score(
        &mut self,
        player_id: PlayerId,
        score: u64,
    ) -> Result<SubmitReceipt, ClientError> {
        let response = self
            .request(|request_id| Packet::SubmitScore {
                request_id,
                player_id,
                score,
            })
            .await?;

        match response {
            Packet::ScoreSubmitted {
                event_id, improved, ..
            } => Ok(SubmitReceipt { event_id, improved }),
            other => Err(ClientError::UnexpectedResponse(other.request_id())),
        }
    }

    pub async fn top(&mut self, n: u32) -> Result<Vec<LeaderboardRow>, ClientError> {
        let response = self
            .request(|request_id| Packet::GetTop { request_id, n })
            .await?;

        match response {
            Packet::Leaderboard { rows, .. } => Ok(rows),
            other => Err(ClientError::UnexpectedResponse(other.request_id())),
        }
    }

    pub async fn player(&mut self, player_id: PlayerId) -> Result<PlayerProfile, ClientError> {
        let response = self
            .request(|request_id| Packet::GetPlayer {
                request_id,
                player_id,
            })
            .await?;

        match response {
            Packet::Profile { profile, .. } => Ok(profile),
            other => Err(ClientError::UnexpectedResponse(other.request_id())),
        }
    }

    pub async fn history(
        &mut self,
        player_id: PlayerId,
        limit: u32,
    ) -> Result<PlayerHistory, ClientError> {
        let response = self
            .request(|request_id| Packet::GetHistory {
                request_id,
                player_id,
                limit,
            })
            .await?;

        match response {
            Packet::History {
                player_id,
                name,
                items,
                ..
            } => Ok(PlayerHistory {
                player_id,
                name,
                items,
            }),
            other => Err(ClientError::UnexpectedResponse(other.request_id())),
        }
    }

    /// Asks the server to re-derive every rank index entry. Returns the
    /// number of ranked players afterwards.
    pub async fn rebuild_index(&mut self) -> Result<u64, ClientError> {
        let response = self
            .request(|request_id| Packet::RebuildIndex { request_id })
            .await?;

        match response {
            Packet::IndexRebuilt { entries, .. } => Ok(entries),
            other => Err(ClientError::UnexpectedResponse(other.request_id())),
        }
    }
}
