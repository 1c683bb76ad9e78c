//! Server network layer: UDP request/response transport in front of the store

use crate::error::StoreError;
use crate::store::RankedScoreStore;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    clamp_limit, get_timestamp, validate_registration, ErrorKind, HistoryItem, Packet,
    MAX_DATAGRAM_SIZE, MAX_HISTORY_LIMIT, MAX_TOP_N,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    Shutdown,
}

/// Messages sent from request handlers to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Leaderboard server: receives requests, runs them against the store
/// concurrently and sends the responses back to the requesting address.
pub struct Server {
    socket: Arc<UdpSocket>,
    store: Arc<RankedScoreStore>,
    reconcile_interval: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        store: Arc<RankedScoreStore>,
        reconcile_interval: Duration,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            store,
            reconcile_interval,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that can stop [`Server::run`] with [`ServerMessage::Shutdown`].
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(OutboundMessage::SendPacket { packet, addr }) = outbound_rx.recv().await
            {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that retries rank index repairs queued after failed writes
    fn spawn_reconciler(&self) {
        let store = Arc::clone(&self.store);
        let period = self.reconcile_interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;

                if store.pending_repairs() == 0 {
                    continue;
                }
                let repaired = store.repair_pending().await;
                info!(
                    "Reconciler repaired {} index entries, {} still pending",
                    repaired,
                    store.pending_repairs()
                );
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Runs one request against the store in its own task
    fn dispatch(&self, packet: Packet, addr: SocketAddr) {
        if !packet.is_request() {
            warn!("Unexpected packet type from client at {}", addr);
            return;
        }

        let store = Arc::clone(&self.store);
        let outbound_tx = self.outbound_tx.clone();

        tokio::spawn(async move {
            let response = handle_request(&store, packet).await;
            if let Err(e) = outbound_tx.send(OutboundMessage::SendPacket {
                packet: response,
                addr,
            }) {
                error!("Failed to queue response for {}: {}", addr, e);
            }
        });
    }

    /// Main server loop
    pub async fn run(&mut self) -> io::Result<()> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_reconciler();

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    debug!("Request {} from {}", packet.request_id(), addr);
                    self.dispatch(packet, addr);
                }
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn error_response(request_id: u32, error: &StoreError) -> Packet {
    Packet::Error {
        request_id,
        kind: error.kind(),
        message: error.to_string(),
    }
}

fn bad_request(request_id: u32, message: &str) -> Packet {
    Packet::Error {
        request_id,
        kind: ErrorKind::BadRequest,
        message: message.to_string(),
    }
}

/// Maps one request packet onto the store and builds the response.
///
/// Scores are stamped with the server's wall clock at the moment the
/// request is handled.
pub async fn handle_request(store: &RankedScoreStore, packet: Packet) -> Packet {
    let request_id = packet.request_id();

    match packet {
        Packet::RegisterPlayer { name, contact, .. } => {
            if let Err(reason) = validate_registration(&name, &contact) {
                return bad_request(request_id, &reason);
            }
            match store.register_player(name.trim(), contact.trim()).await {
                Ok(player) => Packet::PlayerRegistered {
                    request_id,
                    player_id: player.id,
                },
                Err(e) => error_response(request_id, &e),
            }
        }

        Packet::SubmitScore {
            player_id, score, ..
        } => match store.submit_score(player_id, score, get_timestamp()).await {
            Ok(result) => Packet::ScoreSubmitted {
                request_id,
                event_id: result.event_id,
                improved: result.improved,
            },
            Err(e) => error_response(request_id, &e),
        },

        Packet::GetTop { n, .. } => {
            let n = clamp_limit(n, MAX_TOP_N) as usize;
            match store.top_n(n).await {
                Ok(rows) => Packet::Leaderboard {
                    request_id,
                    total: rows.len() as u64,
                    rows,
                },
                Err(e) => error_response(request_id, &e),
            }
        }

        Packet::GetPlayer { player_id, .. } => match store.profile(player_id).await {
            Ok(profile) => Packet::Profile {
                request_id,
                profile,
            },
            Err(e) => error_response(request_id, &e),
        },

        Packet::GetHistory {
            player_id, limit, ..
        } => {
            let Some(player) = store.player(player_id) else {
                return error_response(request_id, &StoreError::UnknownPlayer(player_id));
            };
            let limit = clamp_limit(limit, MAX_HISTORY_LIMIT) as usize;
            match store.history(player_id, limit) {
                Ok(events) => Packet::History {
                    request_id,
                    player_id,
                    name: player.name,
                    items: events.iter().map(HistoryItem::from).collect(),
                },
                Err(e) => error_response(request_id, &e),
            }
        }

        Packet::RebuildIndex { .. } => match store.rebuild_index().await {
            Ok(entries) => Packet::IndexRebuilt {
                request_id,
                entries: entries as u64,
            },
            Err(e) => error_response(request_id, &e),
        },

        _ => bad_request(request_id, "not a request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use shared::PlayerId;

    async fn test_store() -> RankedScoreStore {
        RankedScoreStore::open(StoreConfig::in_memory()).await.unwrap()
    }

    async fn register(store: &RankedScoreStore, name: &str) -> PlayerId {
        match handle_request(
            store,
            Packet::RegisterPlayer {
                request_id: 1,
                name: name.to_string(),
                contact: format!("{}@example.com", name.to_lowercase()),
            },
        )
        .await
        {
            Packet::PlayerRegistered { player_id, .. } => player_id,
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_blank_name() {
        let store = test_store().await;
        let response = handle_request(
            &store,
            Packet::RegisterPlayer {
                request_id: 3,
                name: "  ".to_string(),
                contact: "x".to_string(),
            },
        )
        .await;

        match response {
            Packet::Error {
                request_id, kind, ..
            } => {
                assert_eq!(request_id, 3);
                assert_eq!(kind, ErrorKind::BadRequest);
            }
            _ => panic!("Unexpected packet type"),
        }
    }

    #[tokio::test]
    async fn test_register_enforces_length_limits() {
        let store = test_store().await;

        for (name, contact) in [
            ("x".repeat(30_000), "long@example.com".to_string()),
            ("Short".to_string(), "ab".to_string()),
        ] {
            let response = handle_request(
                &store,
                Packet::RegisterPlayer {
                    request_id: 4,
                    name,
                    contact,
                },
            )
            .await;
            assert!(matches!(
                response,
                Packet::Error {
                    kind: ErrorKind::BadRequest,
                    ..
                }
            ));
        }
        assert!(store.player(PlayerId(1)).is_none());
    }

    #[tokio::test]
    async fn test_top_response_fits_datagram_with_longest_names() {
        let store = test_store().await;

        for i in 0..MAX_TOP_N {
            let name = format!("{:0>width$}", i, width = shared::MAX_NAME_LEN);
            let response = handle_request(
                &store,
                Packet::RegisterPlayer {
                    request_id: i,
                    name,
                    contact: format!("player{}@example.com", i),
                },
            )
            .await;
            let Packet::PlayerRegistered { player_id, .. } = response else {
                panic!("Unexpected response: {:?}", response);
            };
            store
                .submit_score(player_id, u64::from(i), u64::MAX / 2)
                .await
                .unwrap();
        }

        let response = handle_request(
            &store,
            Packet::GetTop {
                request_id: 1,
                n: MAX_TOP_N,
            },
        )
        .await;
        let Packet::Leaderboard { ref rows, .. } = response else {
            panic!("Unexpected packet type");
        };
        assert_eq!(rows.len(), MAX_TOP_N as usize);
        assert!(serialize(&response).unwrap().len() <= MAX_DATAGRAM_SIZE);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_conflict() {
        let store = test_store().await;
        register(&store, "Alice").await;

        let response = handle_request(
            &store,
            Packet::RegisterPlayer {
                request_id: 2,
                name: "Alice".to_string(),
                contact: "alice@example.com".to_string(),
            },
        )
        .await;

        assert!(matches!(
            response,
            Packet::Error {
                kind: ErrorKind::Conflict,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_submit_unknown_player_is_not_found() {
        let store = test_store().await;
        let response = handle_request(
            &store,
            Packet::SubmitScore {
                request_id: 8,
                player_id: PlayerId(404),
                score: 10,
            },
        )
        .await;

        match response {
            Packet::Error {
                request_id,
                kind,
                message,
            } => {
                assert_eq!(request_id, 8);
                assert_eq!(kind, ErrorKind::NotFound);
                assert!(message.contains("404"));
            }
            _ => panic!("Unexpected packet type"),
        }
    }

    #[tokio::test]
    async fn test_submit_and_top() {
        let store = test_store().await;
        let alice = register(&store, "Alice").await;
        let bob = register(&store, "Bob").await;

        for (player_id, score) in [(alice, 100), (bob, 50)] {
            let response = handle_request(
                &store,
                Packet::SubmitScore {
                    request_id: 4,
                    player_id,
                    score,
                },
            )
            .await;
            assert!(matches!(
                response,
                Packet::ScoreSubmitted { improved: true, .. }
            ));
        }

        match handle_request(&store, Packet::GetTop { request_id: 5, n: 0 }).await {
            Packet::Leaderboard { total, rows, .. } => {
                // n is clamped up to one row
                assert_eq!(total, 1);
                assert_eq!(rows[0].player_id, alice);
            }
            _ => panic!("Unexpected packet type"),
        }

        match handle_request(&store, Packet::GetTop { request_id: 6, n: 10 }).await {
            Packet::Leaderboard { total, rows, .. } => {
                assert_eq!(total, 2);
                assert_eq!(rows[1].player_id, bob);
                assert_eq!(rows[1].rank, 2);
            }
            _ => panic!("Unexpected packet type"),
        }
    }

    #[tokio::test]
    async fn test_history_and_profile() {
        let store = test_store().await;
        let player_id = register(&store, "Hist").await;
        for score in 0..3 {
            handle_request(
                &store,
                Packet::SubmitScore {
                    request_id: 1,
                    player_id,
                    score,
                },
            )
            .await;
        }

        match handle_request(
            &store,
            Packet::GetHistory {
                request_id: 2,
                player_id,
                limit: 500,
            },
        )
        .await
        {
            Packet::History { name, items, .. } => {
                assert_eq!(name, "Hist");
                assert_eq!(items.len(), 3);
            }
            _ => panic!("Unexpected packet type"),
        }

        match handle_request(&store, Packet::GetPlayer { request_id: 3, player_id }).await {
            Packet::Profile { profile, .. } => {
                assert_eq!(profile.contact, "hist@example.com");
                assert_eq!(profile.summary.best_score, Some(2));
                assert_eq!(profile.summary.rank, Some(1));
            }
            _ => panic!("Unexpected packet type"),
        }
    }

    #[tokio::test]
    async fn test_rebuild_request() {
        let store = test_store().await;
        let player_id = register(&store, "R").await;
        handle_request(
            &store,
            Packet::SubmitScore {
                request_id: 1,
                player_id,
                score: 1,
            },
        )
        .await;

        let response = handle_request(&store, Packet::RebuildIndex { request_id: 9 }).await;
        assert_eq!(
            response,
            Packet::IndexRebuilt {
                request_id: 9,
                entries: 1
            }
        );
    }

    #[tokio::test]
    async fn test_response_packets_are_not_requests() {
        let store = test_store().await;
        let response = handle_request(
            &store,
            Packet::IndexRebuilt {
                request_id: 1,
                entries: 0,
            },
        )
        .await;
        assert!(matches!(
            response,
            Packet::Error {
                kind: ErrorKind::BadRequest,
                ..
            }
        ));
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();

        let msg = ServerMessage::PacketReceived {
            packet: Packet::GetTop { request_id: 1, n: 10 },
            addr,
        };
        assert!(tx.send(msg).is_ok());

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(packet.request_id(), 1);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_server_answers_over_udp() {
        let store = Arc::new(test_store().await);
        let mut server = Server::new("127.0.0.1:0", store, Duration::from_secs(1))
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let control = server.control();
        let handle = tokio::spawn(async move { server.run().await.is_ok() });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request = serialize(&Packet::GetTop { request_id: 77, n: 5 }).unwrap();
        client.send_to(&request, server_addr).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let response: Packet = deserialize(&buf[..len]).unwrap();
        assert_eq!(
            response,
            Packet::Leaderboard {
                request_id: 77,
                total: 0,
                rows: vec![]
            }
        );

        control.send(ServerMessage::Shutdown).unwrap();
        assert!(handle.await.unwrap());
    }
}
