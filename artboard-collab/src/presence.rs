//! Per-project presence sessions and the registry that shares them.
//!
//! ## Architecture
//!
//! ```text
//! board view ─┐                          ┌─► roster (copies)
//! follow UI ──┼─► SessionRegistry::acquire ─► PresenceSession ──► ChannelConnector
//! sidebar ────┘        (one per project)  └─► custom events
//! ```
//!
//! A session moves `Disconnected → Connecting → Connected` and back to
//! `Disconnected` when its last consumer releases it or the channel
//! closes. Concurrent `acquire` calls share one connection attempt.

use std::collections::HashMap;
use std::sync::Arc;

use artboard_core::ProjectId;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::channel::{ChannelConnector, ConnectionState, PresenceChannel, PresenceError};
use crate::protocol::{ChannelEvent, PresenceUser};

/// A custom event received from another room member.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub sender: String,
    pub name: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Joined(PresenceUser),
    Left(String),
    Cleared,
}

// ───────────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────────

pub struct PresenceSession {
    project_id: ProjectId,
    local_user: PresenceUser,
    connector: Arc<dyn ChannelConnector>,
    state: Arc<RwLock<ConnectionState>>,
    roster: Arc<RwLock<Vec<PresenceUser>>>,
    channel: RwLock<Option<Arc<dyn PresenceChannel>>>,
    /// Serializes connect/disconnect.
    lifecycle: Mutex<()>,
    events: broadcast::Sender<CustomEvent>,
    roster_changes: broadcast::Sender<RosterChange>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceSession {
    pub fn new(
        project_id: ProjectId,
        local_user: PresenceUser,
        connector: Arc<dyn ChannelConnector>,
        capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (roster_changes, _) = broadcast::channel(capacity);
        Self {
            project_id,
            local_user,
            connector,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            roster: Arc::new(RwLock::new(Vec::new())),
            channel: RwLock::new(None),
            lifecycle: Mutex::new(()),
            events,
            roster_changes,
            listener: Mutex::new(None),
        }
    }

    /// Open the channel and join the room. No-op when already connected.
    pub async fn connect(&self) -> Result<(), PresenceError> {
        let _guard = self.lifecycle.lock().await;
        if *self.state.read().await == ConnectionState::Connected {
            return Ok(());
        }
        *self.state.write().await = ConnectionState::Connecting;

        let joined = match self.open_and_join().await {
            Ok(joined) => joined,
            Err(e) => {
                log::warn!("Presence connect to project {} failed: {e}", self.project_id);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        *self.roster.write().await = joined.1;
        let listener = tokio::spawn(Self::listen(
            joined.2,
            self.local_user.socket_id.clone(),
            self.state.clone(),
            self.roster.clone(),
            self.events.clone(),
            self.roster_changes.clone(),
        ));
        if let Some(previous) = self.listener.lock().await.replace(listener) {
            previous.abort();
        }
        *self.channel.write().await = Some(joined.0);
        *self.state.write().await = ConnectionState::Connected;
        log::info!("{} connected to project {}", self.local_user.socket_id, self.project_id);
        Ok(())
    }

    async fn open_and_join(
        &self,
    ) -> Result<(Arc<dyn PresenceChannel>, Vec<PresenceUser>, broadcast::Receiver<ChannelEvent>), PresenceError> {
        let channel = self.connector.open(self.project_id).await?;
        let joined = channel.join(self.local_user.clone()).await?;
        Ok((channel, joined.roster, joined.events))
    }

    async fn listen(
        mut rx: broadcast::Receiver<ChannelEvent>,
        local_socket: String,
        state: Arc<RwLock<ConnectionState>>,
        roster: Arc<RwLock<Vec<PresenceUser>>>,
        events: broadcast::Sender<CustomEvent>,
        roster_changes: broadcast::Sender<RosterChange>,
    ) {
        loop {
            match rx.recv().await {
                Ok(ChannelEvent::Joined(user)) => {
                    let mut users = roster.write().await;
                    match users.iter_mut().find(|u| u.socket_id == user.socket_id) {
                        Some(existing) => *existing = user.clone(),
                        None => users.push(user.clone()),
                    }
                    drop(users);
                    let _ = roster_changes.send(RosterChange::Joined(user));
                }
                Ok(ChannelEvent::Left { socket_id }) => {
                    roster.write().await.retain(|u| u.socket_id != socket_id);
                    let _ = roster_changes.send(RosterChange::Left(socket_id));
                }
                Ok(ChannelEvent::Custom { sender, name, payload }) => {
                    if sender == local_socket {
                        continue;
                    }
                    let _ = events.send(CustomEvent { sender, name, payload });
                }
                Ok(ChannelEvent::Disconnected) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Presence listener for {local_socket} lagged by {n} events");
                }
            }
        }

        log::info!("Presence channel for {local_socket} closed");
        *state.write().await = ConnectionState::Disconnected;
        roster.write().await.clear();
        let _ = roster_changes.send(RosterChange::Cleared);
    }

    /// Leave the room and clear the roster.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
        if let Some(channel) = self.channel.write().await.take() {
            channel.leave(&self.local_user.socket_id).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
        self.roster.write().await.clear();
        let _ = self.roster_changes.send(RosterChange::Cleared);
        log::info!("{} disconnected from project {}", self.local_user.socket_id, self.project_id);
    }

    pub async fn broadcast_custom_event(&self, name: &str, payload: Value) -> Result<(), PresenceError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(PresenceError::NotConnected);
        }
        let channel = self.channel.read().await.clone().ok_or(PresenceError::NotConnected)?;
        log::trace!("{} broadcasts {name}", self.local_user.socket_id);
        channel.broadcast_custom_event(&self.local_user.socket_id, name, payload).await
    }

    /// Roster copy, local user included.
    pub async fn get_users(&self) -> Vec<PresenceUser> {
        self.roster.read().await.clone()
    }

    pub async fn get_users_count(&self) -> usize {
        self.roster.read().await.len()
    }

    /// Roster copy without the local user.
    pub async fn others(&self) -> Vec<PresenceUser> {
        self.roster
            .read()
            .await
            .iter()
            .filter(|u| u.socket_id != self.local_user.socket_id)
            .cloned()
            .collect()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn local_user(&self) -> &PresenceUser {
        &self.local_user
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Custom events from other members.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CustomEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_roster(&self) -> broadcast::Receiver<RosterChange> {
        self.roster_changes.subscribe()
    }
}

// ───────────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────────

struct RegistryEntry {
    session: Arc<PresenceSession>,
    consumers: usize,
}

/// Shares one [`PresenceSession`] per project among its consumers.
pub struct SessionRegistry {
    connector: Arc<dyn ChannelConnector>,
    local_user: PresenceUser,
    capacity: usize,
    sessions: Mutex<HashMap<ProjectId, RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn ChannelConnector>, local_user: PresenceUser, capacity: usize) -> Self {
        Self {
            connector,
            local_user,
            capacity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session for `project_id`, connected. The consumer count is only
    /// kept when the connection succeeds.
    pub async fn acquire(&self, project_id: ProjectId) -> Result<Arc<PresenceSession>, PresenceError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            let entry = sessions.entry(project_id).or_insert_with(|| RegistryEntry {
                session: Arc::new(PresenceSession::new(
                    project_id,
                    self.local_user.clone(),
                    self.connector.clone(),
                    self.capacity,
                )),
                consumers: 0,
            });
            entry.consumers += 1;
            entry.session.clone()
        };

        match session.connect().await {
            Ok(()) => Ok(session),
            Err(e) => {
                self.release(project_id).await;
                Err(e)
            }
        }
    }

    /// Drop one consumer; the last one tears the session down.
    pub async fn release(&self, project_id: ProjectId) {
        let finished = {
            let mut sessions = self.sessions.lock().await;
            let Some(entry) = sessions.get_mut(&project_id) else {
                return;
            };
            entry.consumers = entry.consumers.saturating_sub(1);
            if entry.consumers > 0 {
                return;
            }
            sessions.remove(&project_id).map(|e| e.session)
        };

        if let Some(session) = finished {
            session.disconnect().await;
        }
    }

    pub async fn session(&self, project_id: ProjectId) -> Option<Arc<PresenceSession>> {
        self.sessions.lock().await.get(&project_id).map(|e| e.session.clone())
    }

    pub async fn consumer_count(&self, project_id: ProjectId) -> usize {
        self.sessions.lock().await.get(&project_id).map_or(0, |e| e.consumers)
    }

    pub async fn active_projects(&self) -> Vec<ProjectId> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub fn local_user(&self) -> &PresenceUser {
        &self.local_user
    }
}
