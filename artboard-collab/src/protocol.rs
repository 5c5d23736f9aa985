//! Presence protocol: room members, follow events and relay wire frames.
//!
//! Follow events travel as named custom events with JSON payloads:
//!
//! ```text
//! pageChange     { "pageId": "<uuid>" }
//! viewState      { "columns": 4, "fitMode": true }
//! scrollIndex    { "index": 7 }
//! followRequest  { "leaderId": "<socket id>" }
//! ```
//!
//! Between a [`crate::client::WsChannel`] and the relay server the same
//! events are wrapped in bincode-encoded [`WireFrame`]s.

use artboard_core::{PageId, ProjectId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A connected room member. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub socket_id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

impl PresenceUser {
    pub fn new(socket_id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            socket_id: socket_id.into(),
            name: name.into(),
            email: email.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

// ───────────────────────────────────────────────────────────────────
// Follow events
// ───────────────────────────────────────────────────────────────────

pub const PAGE_CHANGE: &str = "pageChange";
pub const VIEW_STATE: &str = "viewState";
pub const SCROLL_INDEX: &str = "scrollIndex";
pub const FOLLOW_REQUEST: &str = "followRequest";

/// Navigation/view state replicated from a leader to its followers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEvent {
    PageChange { page_id: PageId },
    ViewState { columns: u32, fit_mode: bool },
    ScrollIndex { index: u32 },
    /// Sent by a follower when it starts following `leader_id`.
    FollowRequest { leader_id: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageChangePayload {
    page_id: PageId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewStatePayload {
    columns: u32,
    fit_mode: bool,
}

#[derive(Deserialize)]
struct ScrollIndexPayload {
    index: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowRequestPayload {
    leader_id: String,
}

impl FollowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FollowEvent::PageChange { .. } => PAGE_CHANGE,
            FollowEvent::ViewState { .. } => VIEW_STATE,
            FollowEvent::ScrollIndex { .. } => SCROLL_INDEX,
            FollowEvent::FollowRequest { .. } => FOLLOW_REQUEST,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            FollowEvent::PageChange { page_id } => json!({ "pageId": page_id }),
            FollowEvent::ViewState { columns, fit_mode } => json!({ "columns": columns, "fitMode": fit_mode }),
            FollowEvent::ScrollIndex { index } => json!({ "index": index }),
            FollowEvent::FollowRequest { leader_id } => json!({ "leaderId": leader_id }),
        }
    }

    /// Parse a named custom event. Unknown names and payloads missing
    /// expected fields yield `None`.
    pub fn from_custom(name: &str, payload: &Value) -> Option<Self> {
        let payload = payload.clone();
        match name {
            PAGE_CHANGE => serde_json::from_value::<PageChangePayload>(payload)
                .ok()
                .map(|p| FollowEvent::PageChange { page_id: p.page_id }),
            VIEW_STATE => serde_json::from_value::<ViewStatePayload>(payload)
                .ok()
                .map(|p| FollowEvent::ViewState { columns: p.columns, fit_mode: p.fit_mode }),
            SCROLL_INDEX => serde_json::from_value::<ScrollIndexPayload>(payload)
                .ok()
                .map(|p| FollowEvent::ScrollIndex { index: p.index }),
            FOLLOW_REQUEST => serde_json::from_value::<FollowRequestPayload>(payload)
                .ok()
                .map(|p| FollowEvent::FollowRequest { leader_id: p.leader_id }),
            _ => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Channel events
// ───────────────────────────────────────────────────────────────────

/// Everything a presence channel delivers to a joined member.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Joined(PresenceUser),
    Left { socket_id: String },
    Custom { sender: String, name: String, payload: Value },
    /// Transport went away; no further events will arrive.
    Disconnected,
}

impl ChannelEvent {
    /// Socket id of the member that caused the event, if any.
    pub fn origin(&self) -> Option<&str> {
        match self {
            ChannelEvent::Joined(user) => Some(&user.socket_id),
            ChannelEvent::Left { socket_id } => Some(socket_id),
            ChannelEvent::Custom { sender, .. } => Some(sender),
            ChannelEvent::Disconnected => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Relay wire frames
// ───────────────────────────────────────────────────────────────────

/// Relay frame, bincode-encoded on the WebSocket.
///
/// Custom payloads are carried as JSON text since bincode cannot encode
/// self-describing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireFrame {
    /// Client → server, first frame on a connection.
    Join { room: ProjectId, user: PresenceUser },
    /// Server → client reply to `Join`: everyone currently in the room.
    Roster { users: Vec<PresenceUser> },
    /// Server → client: join refused.
    Rejected { reason: String },
    Joined { user: PresenceUser },
    Left { socket_id: String },
    Custom { sender: String, name: String, payload: String },
}

impl WireFrame {
    pub fn custom(sender: &str, name: &str, payload: &Value) -> Self {
        WireFrame::Custom {
            sender: sender.to_string(),
            name: name.to_string(),
            payload: payload.to_string(),
        }
    }

    /// Frame for a hub event, `None` for events that never cross the wire.
    pub fn from_event(event: &ChannelEvent) -> Option<Self> {
        match event {
            ChannelEvent::Joined(user) => Some(WireFrame::Joined { user: user.clone() }),
            ChannelEvent::Left { socket_id } => Some(WireFrame::Left { socket_id: socket_id.clone() }),
            ChannelEvent::Custom { sender, name, payload } => Some(WireFrame::custom(sender, name, payload)),
            ChannelEvent::Disconnected => None,
        }
    }

    /// Hub event for a frame received from the server. Custom frames with
    /// unparseable payloads are dropped.
    pub fn into_event(self) -> Option<ChannelEvent> {
        match self {
            WireFrame::Joined { user } => Some(ChannelEvent::Joined(user)),
            WireFrame::Left { socket_id } => Some(ChannelEvent::Left { socket_id }),
            WireFrame::Custom { sender, name, payload } => serde_json::from_str(&payload)
                .ok()
                .map(|payload| ChannelEvent::Custom { sender, name, payload }),
            WireFrame::Join { .. } | WireFrame::Roster { .. } | WireFrame::Rejected { .. } => None,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    UnexpectedFrame(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::UnexpectedFrame(e) => write!(f, "Unexpected frame: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_follow_event_payload_shapes() {
        let page_id = Uuid::new_v4();
        assert_eq!(
            FollowEvent::PageChange { page_id }.payload(),
            json!({ "pageId": page_id.to_string() })
        );
        assert_eq!(
            FollowEvent::ViewState { columns: 4, fit_mode: true }.payload(),
            json!({ "columns": 4, "fitMode": true })
        );
        assert_eq!(FollowEvent::ScrollIndex { index: 7 }.payload(), json!({ "index": 7 }));
    }

    #[test]
    fn test_follow_event_parses_by_name() {
        let page_id = Uuid::new_v4();
        let event = FollowEvent::PageChange { page_id };
        assert_eq!(FollowEvent::from_custom(event.name(), &event.payload()), Some(event));

        let parsed = FollowEvent::from_custom("viewState", &json!({ "columns": 2, "fitMode": false }));
        assert_eq!(parsed, Some(FollowEvent::ViewState { columns: 2, fit_mode: false }));
    }

    #[test]
    fn test_malformed_payloads_ignored() {
        assert_eq!(FollowEvent::from_custom("pageChange", &json!({})), None);
        assert_eq!(FollowEvent::from_custom("pageChange", &json!({ "pageId": "not-a-uuid" })), None);
        assert_eq!(FollowEvent::from_custom("viewState", &json!({ "columns": 3 })), None);
        assert_eq!(FollowEvent::from_custom("scrollIndex", &json!({ "index": -1 })), None);
        assert_eq!(FollowEvent::from_custom("cursor", &json!({ "x": 1 })), None);
    }

    #[test]
    fn test_wire_frame_custom_roundtrip() {
        let frame = WireFrame::custom("s1", "scrollIndex", &json!({ "index": 3 }));
        let decoded = WireFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            decoded.into_event(),
            Some(ChannelEvent::Custom { sender: "s1".into(), name: "scrollIndex".into(), payload: json!({ "index": 3 }) })
        );
    }

    #[test]
    fn test_wire_frame_join_roundtrip() {
        let frame = WireFrame::Join {
            room: Uuid::new_v4(),
            user: PresenceUser::new("s1", "Alice", "alice@example.com").with_avatar("https://cdn/a.png"),
        };
        assert_eq!(WireFrame::decode(&frame.encode().unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_custom_frame_with_bad_json_dropped() {
        let frame = WireFrame::Custom { sender: "s1".into(), name: "viewState".into(), payload: "{oops".into() };
        assert!(frame.into_event().is_none());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(WireFrame::decode(&[0xFF, 0xFE, 0xFD]).is_err());
    }

    #[test]
    fn test_event_origin() {
        let user = PresenceUser::new("s9", "Bob", "bob@example.com");
        assert_eq!(ChannelEvent::Joined(user).origin(), Some("s9"));
        assert_eq!(ChannelEvent::Disconnected.origin(), None);
    }
}
