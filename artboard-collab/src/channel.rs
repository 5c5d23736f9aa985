//! Presence channel seam.
//!
//! A [`ChannelConnector`] opens one channel per project room. The
//! in-process hub ([`crate::broadcast::RoomManager`]) and the WebSocket
//! client ([`crate::client::WsConnector`]) both implement it, so sessions
//! never know which transport carries them.

use std::sync::Arc;

use artboard_core::ProjectId;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::protocol::{ChannelEvent, PresenceUser};

/// Connection state shared by sessions and transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of joining a room.
pub struct JoinedRoom {
    /// Members present at join time, including the joining user.
    pub roster: Vec<PresenceUser>,
    /// Every later event in the room, own events included.
    pub events: broadcast::Receiver<ChannelEvent>,
}

#[async_trait]
pub trait PresenceChannel: Send + Sync {
    async fn join(&self, user: PresenceUser) -> Result<JoinedRoom, PresenceError>;

    async fn broadcast_custom_event(&self, sender: &str, name: &str, payload: Value) -> Result<(), PresenceError>;

    async fn leave(&self, socket_id: &str);
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, project_id: ProjectId) -> Result<Arc<dyn PresenceChannel>, PresenceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    NotConnected,
    ChannelClosed,
    RoomFull { max_peers: usize },
    Transport(String),
}

impl std::fmt::Display for PresenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected to a presence room"),
            Self::ChannelClosed => write!(f, "Presence channel closed"),
            Self::RoomFull { max_peers } => write!(f, "Room is full ({max_peers} peers)"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
        }
    }
}

impl std::error::Error for PresenceError {}
