//! WebSocket presence relay with per-project rooms.
//!
//! Architecture:
//! ```text
//! Client A ──┐                              ┌──► Client A
//!            ├── Join(project) ── Room ─────┼──► Client B
//! Client B ──┘                 BroadcastGroup└──► Client C
//! ```
//!
//! The relay holds no board data. It tracks who is in each project room
//! and fans custom events out to everyone but the sender. Frames are
//! bincode-encoded [`WireFrame`]s; the first frame on a connection must
//! be `Join`.

use std::net::SocketAddr;
use std::sync::Arc;

use artboard_core::ProjectId;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::RoomManager;
use crate::channel::PresenceError;
use crate::protocol::{ChannelEvent, ProtocolError, WireFrame};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum members per project room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

struct Membership {
    project_id: ProjectId,
    socket_id: String,
    events: broadcast::Receiver<ChannelEvent>,
}

pub struct RelayServer {
    config: RelayConfig,
    rooms: RoomManager,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = RoomManager::new(config.broadcast_capacity, config.max_peers_per_room);
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Presence relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: RoomManager,
        stats: Arc<RwLock<RelayStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut membership: Option<Membership> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_frames += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            let frame = match WireFrame::decode(&data) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };

                            match frame {
                                WireFrame::Join { room, user } if membership.is_none() => {
                                    let socket_id = user.socket_id.clone();
                                    match rooms.join(room, user).await {
                                        Ok(joined) => {
                                            membership = Some(Membership {
                                                project_id: room,
                                                socket_id: socket_id.clone(),
                                                events: joined.events,
                                            });
                                            stats.write().await.active_rooms = rooms.room_count().await;
                                            let reply = WireFrame::Roster { users: joined.roster };
                                            if let Err(e) = Self::send_frame(&mut ws_sender, &reply).await {
                                                log::warn!("Roster for {socket_id} not delivered: {e}");
                                                break;
                                            }
                                            log::info!("{socket_id} joined project {room}");
                                        }
                                        Err(e @ PresenceError::RoomFull { .. }) => {
                                            log::warn!("Rejected {socket_id} from project {room}: {e}");
                                            let reply = WireFrame::Rejected { reason: e.to_string() };
                                            let _ = Self::send_frame(&mut ws_sender, &reply).await;
                                            break;
                                        }
                                        Err(e) => {
                                            log::error!("Join failed for {socket_id}: {e}");
                                            break;
                                        }
                                    }
                                }
                                WireFrame::Custom { name, payload, .. } if membership.is_some() => {
                                    let Some(member) = membership.as_ref() else {
                                        continue;
                                    };
                                    let Ok(payload) = serde_json::from_str(&payload) else {
                                        log::warn!("Dropping {name} from {}: payload is not JSON", member.socket_id);
                                        continue;
                                    };
                                    if let Some(room) = rooms.room(&member.project_id).await {
                                        // Sender is the connection's identity, not what the frame claims
                                        room.broadcast(ChannelEvent::Custom {
                                            sender: member.socket_id.clone(),
                                            name,
                                            payload,
                                        });
                                    }
                                }
                                frame if membership.is_none() => {
                                    let e = ProtocolError::UnexpectedFrame(format!("{frame:?} before Join"));
                                    log::warn!("Closing {addr}: {e}");
                                    let _ = Self::send_frame(&mut ws_sender, &WireFrame::Rejected { reason: e.to_string() }).await;
                                    break;
                                }
                                frame => {
                                    log::debug!("Ignoring {frame:?} from {addr}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                event = async {
                    match membership.as_mut() {
                        Some(member) => member.events.recv().await,
                        // Not joined yet
                        None => std::future::pending().await,
                    }
                } => {
                    match event {
                        Ok(event) => {
                            let Some(member) = membership.as_ref() else { continue };
                            // Don't echo back to sender
                            if event.origin() == Some(member.socket_id.as_str()) {
                                continue;
                            }
                            if let Some(frame) = WireFrame::from_event(&event) {
                                if let Err(e) = Self::send_frame(&mut ws_sender, &frame).await {
                                    log::warn!("Send to {addr} failed: {e}");
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection {addr} lagged by {n} events");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        if let Some(member) = membership {
            rooms.leave(&member.project_id, &member.socket_id).await;
            log::info!("{} left project {}", member.socket_id, member.project_id);
        }

        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = rooms.room_count().await;
        Ok(())
    }

    async fn send_frame(
        sink: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
        frame: &WireFrame,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        sink.send(Message::Binary(frame.encode()?.into())).await?;
        Ok(())
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_peers_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_relay_custom_config() {
        let server = RelayServer::new(RelayConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_peers_per_room: 2,
            broadcast_capacity: 32,
        });
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(server.rooms().max_peers_per_room(), 2);
    }

    #[tokio::test]
    async fn test_relay_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(server.rooms().room_count().await, 0);
    }
}
