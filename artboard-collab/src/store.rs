//! Persistent store seam and change feed.
//!
//! [`ArtifactStore`] is the authoritative side of every optimistic
//! command; [`ChangeFeed`] pushes per-document notifications whenever the
//! store changes, whoever caused it. [`MemoryStore`] implements both.

use std::collections::HashMap;

use artboard_core::{
    apply_order, remove_artifact, ArtifactId, ArtifactPatch, Command, PageId, ProjectArtifact,
};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{broadcast, Mutex, RwLock};

/// Mutation rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    fn not_found(id: ArtifactId) -> Self {
        Self::new(format!("artifact {id} not found"))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Store error: {}", self.message)
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Page items sorted by position.
    async fn fetch_page(&self, page_id: PageId) -> Result<Vec<ProjectArtifact>, StoreError>;

    async fn update(&self, id: ArtifactId, patch: &ArtifactPatch) -> Result<(), StoreError>;

    async fn delete(&self, id: ArtifactId) -> Result<(), StoreError>;

    /// Rewrite positions of the page holding `ids` so that
    /// `position = index`.
    async fn reorder(&self, ids: &[ArtifactId]) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One changed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub doc: ProjectArtifact,
}

impl ChangeNotification {
    pub fn page_id(&self) -> PageId {
        self.doc.page_id
    }
}

pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ChangeNotification>;
}

/// Submission of a command to the authoritative store.
#[async_trait]
pub trait CommandExecute {
    async fn execute(&self, store: &dyn ArtifactStore) -> Result<(), StoreError>;
}

#[async_trait]
impl CommandExecute for Command {
    async fn execute(&self, store: &dyn ArtifactStore) -> Result<(), StoreError> {
        match self {
            Command::Update { id, patch, .. } => store.update(*id, patch).await,
            Command::Delete { id, .. } => store.delete(*id).await,
            Command::Reorder { ids, .. } => store.reorder(ids).await,
            Command::ToggleReaction { id, .. } => {
                let reactions = self.toggled_reactions().unwrap_or_default();
                store.update(*id, &ArtifactPatch::reactions(reactions)).await
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory store
// ───────────────────────────────────────────────────────────────────

/// Store kept in memory, emitting a notification per changed document.
pub struct MemoryStore {
    artifacts: RwLock<HashMap<ArtifactId, ProjectArtifact>>,
    feed: broadcast::Sender<ChangeNotification>,
    fail_next: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new(feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity);
        Self {
            artifacts: RwLock::new(HashMap::new()),
            feed,
            fail_next: Mutex::new(None),
        }
    }

    /// Insert or replace a document.
    pub async fn insert(&self, artifact: ProjectArtifact) {
        let previous = self.artifacts.write().await.insert(artifact.id, artifact.clone());
        let kind = if previous.is_some() { ChangeKind::Update } else { ChangeKind::Create };
        self.notify(kind, artifact);
    }

    pub async fn get(&self, id: ArtifactId) -> Option<ProjectArtifact> {
        self.artifacts.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }

    /// Reject the next mutation with `message`.
    pub async fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().await = Some(message.into());
    }

    async fn take_failure(&self) -> Result<(), StoreError> {
        match self.fail_next.lock().await.take() {
            Some(message) => {
                warn!("Injected store failure: {message}");
                Err(StoreError::new(message))
            }
            None => Ok(()),
        }
    }

    fn notify(&self, kind: ChangeKind, doc: ProjectArtifact) {
        // No subscribers is fine
        let _ = self.feed.send(ChangeNotification { kind, doc });
    }

    fn page_items(artifacts: &HashMap<ArtifactId, ProjectArtifact>, page_id: PageId) -> Vec<ProjectArtifact> {
        let mut items: Vec<ProjectArtifact> =
            artifacts.values().filter(|a| a.page_id == page_id).cloned().collect();
        items.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
        items
    }

    /// Write back a rewritten page, notifying for every document that
    /// actually changed.
    fn commit_page(&self, artifacts: &mut HashMap<ArtifactId, ProjectArtifact>, items: Vec<ProjectArtifact>) {
        for item in items {
            if artifacts.get(&item.id) != Some(&item) {
                artifacts.insert(item.id, item.clone());
                self.notify(ChangeKind::Update, item);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn fetch_page(&self, page_id: PageId) -> Result<Vec<ProjectArtifact>, StoreError> {
        Ok(Self::page_items(&*self.artifacts.read().await, page_id))
    }

    async fn update(&self, id: ArtifactId, patch: &ArtifactPatch) -> Result<(), StoreError> {
        self.take_failure().await?;
        let mut artifacts = self.artifacts.write().await;
        let item = artifacts.get_mut(&id).ok_or_else(|| StoreError::not_found(id))?;
        patch.apply_to(item);
        let doc = item.clone();
        drop(artifacts);
        debug!("Updated artifact {id}");
        self.notify(ChangeKind::Update, doc);
        Ok(())
    }

    async fn delete(&self, id: ArtifactId) -> Result<(), StoreError> {
        self.take_failure().await?;
        let mut artifacts = self.artifacts.write().await;
        let removed = artifacts.get(&id).cloned().ok_or_else(|| StoreError::not_found(id))?;

        let mut items = Self::page_items(&artifacts, removed.page_id);
        remove_artifact(&mut items, id);
        artifacts.remove(&id);
        self.notify(ChangeKind::Delete, removed);
        self.commit_page(&mut artifacts, items);
        debug!("Deleted artifact {id}");
        Ok(())
    }

    async fn reorder(&self, ids: &[ArtifactId]) -> Result<(), StoreError> {
        self.take_failure().await?;
        let mut artifacts = self.artifacts.write().await;
        let Some(page_id) = ids.iter().find_map(|id| artifacts.get(id)).map(|a| a.page_id) else {
            // Nothing known to reorder
            return Ok(());
        };

        let items = apply_order(&Self::page_items(&artifacts, page_id), ids);
        self.commit_page(&mut artifacts, items);
        debug!("Reordered page {page_id} ({} ids)", ids.len());
        Ok(())
    }
}

impl ChangeFeed for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.feed.subscribe()
    }
}
