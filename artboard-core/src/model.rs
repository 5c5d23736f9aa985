//! Board data model: artifacts, their page placements, reactions and the
//! partial-update patch used by the command layer.
//!
//! ```text
//! Project ──┬── Page ──┬── ProjectArtifact (position 0) ──► Artifact
//!           │          ├── ProjectArtifact (position 1) ──► Artifact
//!           │          └── …
//!           └── Page …
//! ```
//!
//! Every placement on a page carries a `position`. After reconciliation the
//! positions on one page are dense (`0..N-1`); mid-drag they may briefly
//! contain duplicates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type ArtifactId = Uuid;
pub type PageId = Uuid;
pub type ProjectId = Uuid;
/// Reactor / socket identity. Opaque string handed out by the auth layer.
pub type UserId = String;

// ───────────────────────────────────────────────────────────────────
// Artifact
// ───────────────────────────────────────────────────────────────────

/// Media kind of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Image,
    Video,
    Audio,
    Text,
    Link,
    Other,
}

impl Default for ArtifactType {
    fn default() -> Self {
        ArtifactType::Other
    }
}

/// A media item as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub source_url: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub name: String,
}

impl Artifact {
    pub fn new(artifact_type: ArtifactType, name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_type,
            source_url: source_url.into(),
            metadata: Map::new(),
            name: name.into(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Reactions
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

/// Per-placement reaction lists.
///
/// The two lists are independent: one user may appear in both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    #[serde(default)]
    pub like: Vec<UserId>,
    #[serde(default)]
    pub dislike: Vec<UserId>,
}

impl Reactions {
    pub fn list(&self, kind: ReactionKind) -> &[UserId] {
        match kind {
            ReactionKind::Like => &self.like,
            ReactionKind::Dislike => &self.dislike,
        }
    }

    fn list_mut(&mut self, kind: ReactionKind) -> &mut Vec<UserId> {
        match kind {
            ReactionKind::Like => &mut self.like,
            ReactionKind::Dislike => &mut self.dislike,
        }
    }

    /// Add `user` to the `kind` list if absent, remove it if present.
    ///
    /// Returns `true` when the user now holds the reaction.
    pub fn toggle(&mut self, kind: ReactionKind, user: &str) -> bool {
        let list = self.list_mut(kind);
        if let Some(idx) = list.iter().position(|u| u == user) {
            list.remove(idx);
            false
        } else {
            list.push(user.to_string());
            true
        }
    }

    pub fn has(&self, kind: ReactionKind, user: &str) -> bool {
        self.list(kind).iter().any(|u| u == user)
    }
}

// ───────────────────────────────────────────────────────────────────
// ProjectArtifact (placement junction)
// ───────────────────────────────────────────────────────────────────

/// An artifact placed on a page at a position.
///
/// Collection heads carry `collection_items`; members carry
/// `parent_collection_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectArtifact {
    pub id: ArtifactId,
    pub project_id: ProjectId,
    pub page_id: PageId,
    pub position: u32,
    /// Per-placement name override.
    #[serde(default)]
    pub name: Option<String>,
    pub artifact: Artifact,
    #[serde(default)]
    pub collection_items: Vec<ArtifactId>,
    #[serde(default)]
    pub is_expanded: bool,
    #[serde(default)]
    pub parent_collection_id: Option<ArtifactId>,
    #[serde(default)]
    pub reactions: Reactions,
}

impl ProjectArtifact {
    /// Place `artifact` on a page. The placement id is the artifact id.
    pub fn new(project_id: ProjectId, page_id: PageId, position: u32, artifact: Artifact) -> Self {
        Self {
            id: artifact.id,
            project_id,
            page_id,
            position,
            name: None,
            artifact,
            collection_items: Vec::new(),
            is_expanded: false,
            parent_collection_id: None,
            reactions: Reactions::default(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.artifact.name)
    }

    /// A head with at least one member.
    pub fn is_collection_head(&self) -> bool {
        !self.collection_items.is_empty()
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_collection_id.is_none()
    }
}

// ───────────────────────────────────────────────────────────────────
// Patch
// ───────────────────────────────────────────────────────────────────

/// Partial update for one placement. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPatch {
    /// `Some(None)` clears the placement override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_items: Option<Vec<ArtifactId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_expanded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_collection_id: Option<Option<ArtifactId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Reactions>,
}

impl ArtifactPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self { name: Some(Some(name.into())), ..Self::default() }
    }

    pub fn metadata(metadata: Map<String, Value>) -> Self {
        Self { metadata: Some(metadata), ..Self::default() }
    }

    pub fn collection_items(items: Vec<ArtifactId>) -> Self {
        Self { collection_items: Some(items), ..Self::default() }
    }

    pub fn parent(parent: Option<ArtifactId>) -> Self {
        Self { parent_collection_id: Some(parent), ..Self::default() }
    }

    pub fn reactions(reactions: Reactions) -> Self {
        Self { reactions: Some(reactions), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply every set field to `target`.
    pub fn apply_to(&self, target: &mut ProjectArtifact) {
        if let Some(name) = &self.name {
            target.name = name.clone();
        }
        if let Some(metadata) = &self.metadata {
            target.artifact.metadata = metadata.clone();
        }
        if let Some(items) = &self.collection_items {
            target.collection_items = items.clone();
        }
        if let Some(expanded) = self.is_expanded {
            target.is_expanded = expanded;
        }
        if let Some(parent) = self.parent_collection_id {
            target.parent_collection_id = parent;
        }
        if let Some(reactions) = &self.reactions {
            target.reactions = reactions.clone();
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Position helpers
// ───────────────────────────────────────────────────────────────────

/// Sort by position, ties broken by id so the order is deterministic.
pub fn sort_by_position(items: &mut [ProjectArtifact]) {
    items.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
}

/// Rewrite positions to `0..N-1` in current position order.
pub fn compact_positions(items: &mut Vec<ProjectArtifact>) {
    sort_by_position(items);
    for (idx, item) in items.iter_mut().enumerate() {
        item.position = idx as u32;
    }
}

/// Whether positions are exactly `0..N-1` with no gaps or duplicates.
pub fn is_dense(items: &[ProjectArtifact]) -> bool {
    let mut seen = vec![false; items.len()];
    for item in items {
        match seen.get_mut(item.position as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// Ids in position order.
pub fn ordered_ids(items: &[ProjectArtifact]) -> Vec<ArtifactId> {
    let mut sorted = items.to_vec();
    sort_by_position(&mut sorted);
    sorted.into_iter().map(|a| a.id).collect()
}
