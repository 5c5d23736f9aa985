//! # artboard-collab: async sync layer for the artboard
//!
//! Keeps each viewer's page views consistent with the shared store and
//! mirrors a leader's navigation onto followers.
//!
//! ## Architecture
//!
//! ```text
//!  Command ──► CacheBridge ──► ArtifactStore ──► ChangeFeed
//!                  ▲                                 │
//!                  └──────── FeedSubscriber ◄────────┘
//!
//!  FollowReplicator ──► PresenceSession ──► PresenceChannel
//!                        (SessionRegistry)     ├─ LocalChannel (RoomManager)
//!                                              └─ WsChannel ◄──► RelayServer
//! ```
//!
//! ## Modules
//!
//! - [`store`]: store and change-feed traits, in-memory store
//! - [`cache`]: per-page views with optimistic apply and revalidation
//! - [`feed`]: debounced revalidation from the change feed
//! - [`channel`]: presence channel seam
//! - [`broadcast`]: in-process rooms with fan-out
//! - [`presence`]: per-project sessions and their registry
//! - [`follow`]: leader/follower view replication
//! - [`protocol`]: follow events and relay wire frames
//! - [`server`]: WebSocket presence relay
//! - [`client`]: WebSocket presence channel

pub mod broadcast;
pub mod cache;
pub mod channel;
pub mod client;
pub mod config;
pub mod feed;
pub mod follow;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, LocalChannel, RoomManager};
pub use cache::{CacheBridge, CacheUpdate, MutateOptions, UpdateSource};
pub use channel::{ChannelConnector, ConnectionState, JoinedRoom, PresenceChannel, PresenceError};
pub use client::{WsChannel, WsConnector};
pub use config::SyncConfig;
pub use feed::{FeedSubscriber, FeedSubscription};
pub use follow::{scroll_index_for, FollowAction, FollowLeader, FollowReceiver, FollowReplicator, FollowerView};
pub use presence::{CustomEvent, PresenceSession, RosterChange, SessionRegistry};
pub use protocol::{ChannelEvent, FollowEvent, PresenceUser, ProtocolError, WireFrame};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use store::{
    ArtifactStore, ChangeFeed, ChangeKind, ChangeNotification, CommandExecute, MemoryStore, StoreError,
};
