//! Per-project presence rooms with fan-out to every member.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! member gets an independent receiver that buffers up to `capacity`
//! events; a member that falls further behind observes `Lagged`.
//!
//! The same rooms back the relay server and the in-process
//! [`LocalChannel`] used when no network hop is needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use artboard_core::ProjectId;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::channel::{ChannelConnector, JoinedRoom, PresenceChannel, PresenceError};
use crate::protocol::{ChannelEvent, PresenceUser};

/// Statistics for monitoring room health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub events_sent: u64,
    pub active_peers: usize,
}

/// A broadcast group for a single project room.
///
/// Events reach every subscriber including the originator; skipping
/// one's own events is the receiver's job.
pub struct BroadcastGroup {
    sender: broadcast::Sender<ChannelEvent>,
    /// Members in join order.
    peers: RwLock<Vec<PresenceUser>>,
    capacity: usize,
    events_sent: AtomicU64,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(Vec::new()),
            capacity,
            events_sent: AtomicU64::new(0),
        }
    }

    /// Add a member and announce it.
    ///
    /// The receiver is subscribed before the announcement, so the new
    /// member sees its own `Joined` event. Re-adding a known socket id
    /// replaces the stored user.
    pub async fn add_peer(&self, user: PresenceUser) -> JoinedRoom {
        let mut peers = self.peers.write().await;
        match peers.iter_mut().find(|p| p.socket_id == user.socket_id) {
            Some(existing) => *existing = user.clone(),
            None => peers.push(user.clone()),
        }
        let events = self.sender.subscribe();
        let roster = peers.clone();
        drop(peers);
        self.broadcast(ChannelEvent::Joined(user));
        JoinedRoom { roster, events }
    }

    /// Remove a member and announce its departure.
    pub async fn remove_peer(&self, socket_id: &str) -> Option<PresenceUser> {
        let mut peers = self.peers.write().await;
        let index = peers.iter().position(|p| p.socket_id == socket_id)?;
        let removed = peers.remove(index);
        drop(peers);
        self.broadcast(ChannelEvent::Left { socket_id: socket_id.to_string() });
        Some(removed)
    }

    /// Send an event to all subscribers. Returns the receiver count.
    pub fn broadcast(&self, event: ChannelEvent) -> usize {
        let count = self.sender.send(event).unwrap_or(0);
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PresenceUser> {
        self.peers.read().await.clone()
    }

    pub async fn has_peer(&self, socket_id: &str) -> bool {
        self.peers.read().await.iter().any(|p| p.socket_id == socket_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Room manager: maps project IDs to broadcast groups.
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<ProjectId, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
    max_peers_per_room: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize, max_peers_per_room: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
            max_peers_per_room,
        }
    }

    /// Get or create the room for a project.
    pub async fn get_or_create(&self, project_id: ProjectId) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&project_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(&project_id) {
            return room.clone();
        }

        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(project_id, room.clone());
        room
    }

    /// Join a room, refusing when it already holds `max_peers_per_room`
    /// members other than `user`.
    ///
    /// Lookup, capacity check and insert happen under the room map's write
    /// lock, so a concurrent `leave` cannot retire the room in between.
    pub async fn join(&self, project_id: ProjectId, user: PresenceUser) -> Result<JoinedRoom, PresenceError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(project_id)
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone();
        let count = room.peer_count().await;
        if count >= self.max_peers_per_room && !room.has_peer(&user.socket_id).await {
            if count == 0 {
                rooms.remove(&project_id);
            }
            return Err(PresenceError::RoomFull { max_peers: self.max_peers_per_room });
        }
        Ok(room.add_peer(user).await)
    }

    /// Leave a room and drop it once empty.
    pub async fn leave(&self, project_id: &ProjectId, socket_id: &str) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(project_id).cloned() else {
            return;
        };
        room.remove_peer(socket_id).await;
        if room.peer_count().await == 0 {
            rooms.remove(project_id);
        }
    }

    /// Remove an empty room.
    pub async fn remove_if_empty(&self, project_id: &ProjectId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(project_id) {
            if room.peer_count().await == 0 {
                rooms.remove(project_id);
                return true;
            }
        }
        false
    }

    pub async fn room(&self, project_id: &ProjectId) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(project_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_projects(&self) -> Vec<ProjectId> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub fn max_peers_per_room(&self) -> usize {
        self.max_peers_per_room
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(256, 100)
    }
}

// ───────────────────────────────────────────────────────────────────
// In-process channel
// ───────────────────────────────────────────────────────────────────

/// Presence channel backed directly by a [`RoomManager`] room.
pub struct LocalChannel {
    project_id: ProjectId,
    rooms: RoomManager,
}

#[async_trait]
impl PresenceChannel for LocalChannel {
    async fn join(&self, user: PresenceUser) -> Result<JoinedRoom, PresenceError> {
        self.rooms.join(self.project_id, user).await
    }

    async fn broadcast_custom_event(&self, sender: &str, name: &str, payload: Value) -> Result<(), PresenceError> {
        let room = self.rooms.room(&self.project_id).await.ok_or(PresenceError::NotConnected)?;
        if !room.has_peer(sender).await {
            return Err(PresenceError::NotConnected);
        }
        room.broadcast(ChannelEvent::Custom {
            sender: sender.to_string(),
            name: name.to_string(),
            payload,
        });
        Ok(())
    }

    async fn leave(&self, socket_id: &str) {
        self.rooms.leave(&self.project_id, socket_id).await;
    }
}

#[async_trait]
impl ChannelConnector for RoomManager {
    async fn open(&self, project_id: ProjectId) -> Result<Arc<dyn PresenceChannel>, PresenceError> {
        Ok(Arc::new(LocalChannel { project_id, rooms: self.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn user(id: &str) -> PresenceUser {
        PresenceUser::new(id, id.to_uppercase(), format!("{id}@example.com"))
    }

    #[tokio::test]
    async fn test_broadcast_group_add_remove() {
        let group = BroadcastGroup::new(16);
        let _joined = group.add_peer(user("alice")).await;
        assert_eq!(group.peer_count().await, 1);
        assert!(group.has_peer("alice").await);

        group.remove_peer("alice").await;
        assert_eq!(group.peer_count().await, 0);
        assert!(!group.has_peer("alice").await);
    }

    #[tokio::test]
    async fn test_join_announces_to_everyone() {
        let group = BroadcastGroup::new(16);
        let mut alice = group.add_peer(user("alice")).await.events;
        assert_eq!(alice.recv().await.unwrap(), ChannelEvent::Joined(user("alice")));

        let bob = group.add_peer(user("bob")).await;
        assert_eq!(bob.roster, vec![user("alice"), user("bob")]);
        assert_eq!(alice.recv().await.unwrap(), ChannelEvent::Joined(user("bob")));

        group.remove_peer("bob").await;
        assert_eq!(alice.recv().await.unwrap(), ChannelEvent::Left { socket_id: "bob".into() });
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let group = BroadcastGroup::new(16);
        let mut rx1 = group.add_peer(user("a")).await.events;
        let mut rx2 = group.add_peer(user("b")).await.events;
        let mut rx3 = group.add_peer(user("c")).await.events;

        let event = ChannelEvent::Custom { sender: "a".into(), name: "ping".into(), payload: json!({}) };
        // Includes the sender
        assert_eq!(group.broadcast(event.clone()), 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let mut last = rx.recv().await.unwrap();
            while last != event {
                last = rx.recv().await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_rejoin_replaces_user() {
        let group = BroadcastGroup::new(16);
        let _a = group.add_peer(user("alice")).await;
        let renamed = PresenceUser::new("alice", "Alice B", "alice@example.com");
        let joined = group.add_peer(renamed.clone()).await;
        assert_eq!(joined.roster, vec![renamed]);
    }

    #[tokio::test]
    async fn test_broadcast_stats() {
        let group = BroadcastGroup::new(16);
        let _rx = group.add_peer(user("alice")).await;
        group.broadcast(ChannelEvent::Disconnected);

        let stats = group.stats().await;
        // Joined announcement plus the explicit event
        assert_eq!(stats.events_sent, 2);
        assert_eq!(stats.active_peers, 1);
        assert_eq!(group.capacity(), 16);
    }

    #[tokio::test]
    async fn test_room_manager_get_or_create() {
        let manager = RoomManager::new(16, 10);
        let project = Uuid::new_v4();

        let room1 = manager.get_or_create(project).await;
        let room2 = manager.get_or_create(project).await;
        assert!(Arc::ptr_eq(&room1, &room2));
        assert_eq!(manager.room_count().await, 1);

        let other = Uuid::new_v4();
        manager.get_or_create(other).await;
        let projects = manager.active_projects().await;
        assert!(projects.contains(&project));
        assert!(projects.contains(&other));
    }

    #[tokio::test]
    async fn test_room_manager_cleanup() {
        let manager = RoomManager::new(16, 10);
        let project = Uuid::new_v4();

        let _joined = manager.join(project, user("alice")).await.unwrap();
        assert!(!manager.remove_if_empty(&project).await);

        manager.leave(&project, "alice").await;
        assert_eq!(manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_room_full() {
        let manager = RoomManager::new(16, 1);
        let project = Uuid::new_v4();
        let _alice = manager.join(project, user("alice")).await.unwrap();

        let err = manager.join(project, user("bob")).await.err();
        assert_eq!(err, Some(PresenceError::RoomFull { max_peers: 1 }));
        // Rejoining with the same socket is not a new member
        assert!(manager.join(project, user("alice")).await.is_ok());
    }

    #[tokio::test]
    async fn test_local_channel_custom_event() {
        let manager = RoomManager::new(16, 10);
        let project = Uuid::new_v4();
        let channel = manager.open(project).await.unwrap();

        let mut alice = channel.join(user("alice")).await.unwrap().events;
        channel.broadcast_custom_event("alice", "viewState", json!({ "columns": 3 })).await.unwrap();

        assert_eq!(alice.recv().await.unwrap(), ChannelEvent::Joined(user("alice")));
        assert_eq!(
            alice.recv().await.unwrap(),
            ChannelEvent::Custom { sender: "alice".into(), name: "viewState".into(), payload: json!({ "columns": 3 }) }
        );
    }

    #[tokio::test]
    async fn test_local_channel_requires_membership() {
        let manager = RoomManager::new(16, 10);
        let channel = manager.open(Uuid::new_v4()).await.unwrap();
        let result = channel.broadcast_custom_event("ghost", "pageChange", json!({})).await;
        assert_eq!(result, Err(PresenceError::NotConnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_racing_last_leave_lands_in_live_room() {
        let manager = RoomManager::new(16, 10);
        for _ in 0..200 {
            let project = Uuid::new_v4();
            let _alice = manager.join(project, user("alice")).await.unwrap();

            let leaving = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.leave(&project, "alice").await })
            };
            let joining = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.join(project, user("bob")).await.map(|_| ()) })
            };
            leaving.await.unwrap();
            joining.await.unwrap().unwrap();

            let room = manager.room(&project).await.expect("joined member's room was retired");
            assert_eq!(room.peers().await, vec![user("bob")]);
            manager.leave(&project, "bob").await;
            assert!(manager.room(&project).await.is_none());
        }
    }
}
