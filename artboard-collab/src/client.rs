//! WebSocket presence channel talking to the relay server.
//!
//! Provides:
//! - Join handshake (`Join` → `Roster` or `Rejected`)
//! - Custom event send/receive
//! - A `Disconnected` event once the socket closes

use std::sync::Arc;
use std::time::Duration;

use artboard_core::ProjectId;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::{ChannelConnector, ConnectionState, JoinedRoom, PresenceChannel, PresenceError};
use crate::protocol::{ChannelEvent, PresenceUser, WireFrame};

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a [`WsChannel`] per project against one relay.
#[derive(Debug, Clone)]
pub struct WsConnector {
    server_url: String,
    event_capacity: usize,
}

impl WsConnector {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self { server_url: server_url.into(), event_capacity: 256 }
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn open(&self, project_id: ProjectId) -> Result<Arc<dyn PresenceChannel>, PresenceError> {
        Ok(Arc::new(WsChannel::new(self.server_url.clone(), project_id, self.event_capacity)))
    }
}

pub struct WsChannel {
    server_url: String,
    project_id: ProjectId,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    events: broadcast::Sender<ChannelEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsChannel {
    pub fn new(server_url: impl Into<String>, project_id: ProjectId, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            server_url: server_url.into(),
            project_id,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: Mutex::new(None),
            events,
            reader: Mutex::new(None),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn send_frame(&self, frame: &WireFrame) -> Result<(), PresenceError> {
        let encoded = frame.encode().map_err(|e| PresenceError::Transport(e.to_string()))?;
        let tx = self.outgoing_tx.lock().await.clone().ok_or(PresenceError::NotConnected)?;
        tx.send(encoded).await.map_err(|_| PresenceError::ChannelClosed)
    }
}

#[async_trait]
impl PresenceChannel for WsChannel {
    async fn join(&self, user: PresenceUser) -> Result<JoinedRoom, PresenceError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/{}", self.server_url, self.project_id);
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(conn) => conn,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(PresenceError::Transport(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let join = WireFrame::Join { room: self.project_id, user: user.clone() };
        let handshake = async {
            let encoded = join.encode().map_err(|e| PresenceError::Transport(e.to_string()))?;
            ws_writer
                .send(Message::Binary(encoded.into()))
                .await
                .map_err(|e| PresenceError::Transport(e.to_string()))?;

            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match WireFrame::decode(&data) {
                        Ok(WireFrame::Roster { users }) => return Ok(users),
                        Ok(WireFrame::Rejected { reason }) => return Err(PresenceError::Transport(reason)),
                        Ok(other) => log::debug!("Ignoring {other:?} before roster"),
                        Err(e) => log::warn!("Bad frame during join: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            Err(PresenceError::ChannelClosed)
        };

        let roster = match tokio::time::timeout(JOIN_TIMEOUT, handshake).await {
            Ok(Ok(roster)) => roster,
            Ok(Err(e)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(PresenceError::Transport("join timed out".to_string()));
            }
        };

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });
        *self.outgoing_tx.lock().await = Some(out_tx);

        let events = self.events.subscribe();

        // Reader task: relay frames into the event channel
        let event_tx = self.events.clone();
        let state = self.state.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match WireFrame::decode(&data) {
                        Ok(frame) => {
                            if let Some(event) = frame.into_event() {
                                let _ = event_tx.send(event);
                            }
                        }
                        Err(e) => log::warn!("Failed to decode relay frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ChannelEvent::Disconnected);
        });
        if let Some(previous) = self.reader.lock().await.replace(reader) {
            previous.abort();
        }

        *self.state.write().await = ConnectionState::Connected;
        log::info!("{} joined project {} via {}", user.socket_id, self.project_id, self.server_url);
        Ok(JoinedRoom { roster, events })
    }

    async fn broadcast_custom_event(&self, sender: &str, name: &str, payload: Value) -> Result<(), PresenceError> {
        self.send_frame(&WireFrame::custom(sender, name, &payload)).await
    }

    async fn leave(&self, socket_id: &str) {
        // Dropping the sender closes the socket from the writer task
        self.outgoing_tx.lock().await.take();
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        *self.state.write().await = ConnectionState::Disconnected;
        log::debug!("{socket_id} left project {}", self.project_id);
    }
}
