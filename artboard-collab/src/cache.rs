//! Reactive page cache bridging optimistic commands and the store.
//!
//! ```text
//!  Command ──► optimistic_state ──► page view ──► CacheUpdate (Optimistic)
//!     │
//!     └──► store ──ok──► (nothing, feed revalidates later)
//!              └─err──► revalidate ──► page view ──► CacheUpdate (Authoritative)
//! ```
//!
//! Failed commands are never rolled back; the page is refetched instead,
//! so commands layered on top of the failed one stay consistent with the
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use artboard_core::{Command, PageId, ProjectArtifact};
use log::{debug, warn};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::store::{ArtifactStore, CommandExecute, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Optimistic,
    Authoritative,
}

/// Emitted whenever a page view is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUpdate {
    pub page_id: PageId,
    pub source: UpdateSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutateOptions {
    /// Refetch from the store right after the write.
    pub revalidate: bool,
}

struct PageView {
    artifacts: Vec<ProjectArtifact>,
    source: UpdateSource,
}

pub struct CacheBridge {
    store: Arc<dyn ArtifactStore>,
    pages: RwLock<HashMap<PageId, PageView>>,
    updates: broadcast::Sender<CacheUpdate>,
}

impl CacheBridge {
    pub fn new(store: Arc<dyn ArtifactStore>, capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity);
        Self {
            store,
            pages: RwLock::new(HashMap::new()),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates.subscribe()
    }

    /// Current view of a page, `None` if it was never loaded.
    pub async fn view(&self, page_id: PageId) -> Option<Vec<ProjectArtifact>> {
        self.pages.read().await.get(&page_id).map(|v| v.artifacts.clone())
    }

    /// Whether the page's latest write came from an optimistic projection.
    pub async fn is_optimistic(&self, page_id: PageId) -> bool {
        self.pages
            .read()
            .await
            .get(&page_id)
            .is_some_and(|v| v.source == UpdateSource::Optimistic)
    }

    pub async fn held_pages(&self) -> Vec<PageId> {
        self.pages.read().await.keys().cloned().collect()
    }

    /// Fetch a page from the store and hold it.
    pub async fn load(&self, page_id: PageId) -> Result<Vec<ProjectArtifact>, StoreError> {
        let artifacts = self.store.fetch_page(page_id).await?;
        self.write(page_id, artifacts.clone(), UpdateSource::Authoritative).await;
        Ok(artifacts)
    }

    /// Replace a page view with locally predicted data.
    pub async fn mutate(
        &self,
        page_id: PageId,
        artifacts: Vec<ProjectArtifact>,
        options: MutateOptions,
    ) -> Result<(), StoreError> {
        self.write(page_id, artifacts, UpdateSource::Optimistic).await;
        if options.revalidate {
            self.revalidate(page_id).await?;
        }
        Ok(())
    }

    /// Refetch a held page from the store. Pages not held are ignored.
    pub async fn revalidate(&self, page_id: PageId) -> Result<(), StoreError> {
        if !self.pages.read().await.contains_key(&page_id) {
            return Ok(());
        }
        let artifacts = self.store.fetch_page(page_id).await?;

        let mut pages = self.pages.write().await;
        // Evicted while fetching
        let Some(view) = pages.get_mut(&page_id) else {
            return Ok(());
        };
        view.artifacts = artifacts;
        view.source = UpdateSource::Authoritative;
        drop(pages);
        debug!("Revalidated page {page_id}");
        let _ = self.updates.send(CacheUpdate { page_id, source: UpdateSource::Authoritative });
        Ok(())
    }

    /// Apply `command` optimistically, then submit it to the store.
    ///
    /// On failure the page is revalidated and the store error returned.
    pub async fn run(&self, page_id: PageId, command: Command) -> Result<(), StoreError> {
        self.apply_optimistic(page_id, &command).await;
        self.persist(page_id, command).await
    }

    /// Apply `command` to the view now and persist it on a spawned task.
    ///
    /// Evicting the page does not cancel the remote call; its result is
    /// simply not observed.
    pub async fn submit(self: &Arc<Self>, page_id: PageId, command: Command) -> JoinHandle<Result<(), StoreError>> {
        self.apply_optimistic(page_id, &command).await;
        let cache = self.clone();
        tokio::spawn(async move { cache.persist(page_id, command).await })
    }

    /// Stop holding a page.
    pub async fn evict(&self, page_id: PageId) -> bool {
        self.pages.write().await.remove(&page_id).is_some()
    }

    /// Project `command` onto a held page. Pages not held stay absent.
    async fn apply_optimistic(&self, page_id: PageId, command: &Command) {
        {
            let mut pages = self.pages.write().await;
            let Some(view) = pages.get_mut(&page_id) else {
                debug!("{:?} on unheld page {page_id}: no optimistic view", command.kind());
                return;
            };
            view.artifacts = command.optimistic_state(&view.artifacts);
            view.source = UpdateSource::Optimistic;
        }
        let _ = self.updates.send(CacheUpdate { page_id, source: UpdateSource::Optimistic });
    }

    async fn persist(&self, page_id: PageId, command: Command) -> Result<(), StoreError> {
        match command.execute(self.store.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("{:?} on page {page_id} rejected: {e}", command.kind());
                if let Err(refetch) = self.revalidate(page_id).await {
                    warn!("Revalidation of page {page_id} failed: {refetch}");
                }
                Err(e)
            }
        }
    }

    async fn write(&self, page_id: PageId, artifacts: Vec<ProjectArtifact>, source: UpdateSource) {
        self.pages.write().await.insert(page_id, PageView { artifacts, source });
        let _ = self.updates.send(CacheUpdate { page_id, source });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use artboard_core::{ordered_ids, Artifact, ArtifactPatch, ArtifactType, ReactionKind};
    use uuid::Uuid;

    async fn setup(n: usize) -> (Arc<MemoryStore>, Arc<CacheBridge>, PageId, Vec<Uuid>) {
        let store = Arc::new(MemoryStore::new(64));
        let (project, page) = (Uuid::new_v4(), Uuid::new_v4());
        let mut ids = Vec::new();
        for i in 0..n {
            let a = Artifact::new(ArtifactType::Video, format!("v{i}"), "https://cdn/v.mp4");
            let pa = ProjectArtifact::new(project, page, i as u32, a);
            ids.push(pa.id);
            store.insert(pa).await;
        }
        let cache = Arc::new(CacheBridge::new(store.clone(), 16));
        cache.load(page).await.unwrap();
        (store, cache, page, ids)
    }

    #[tokio::test]
    async fn test_run_applies_optimistic_then_persists() {
        let (store, cache, page, ids) = setup(3).await;
        let mut updates = cache.subscribe();

        let prior = cache.view(page).await.unwrap();
        cache.run(page, Command::reorder(&prior, vec![ids[2], ids[1], ids[0]])).await.unwrap();

        assert_eq!(updates.recv().await.unwrap(), CacheUpdate { page_id: page, source: UpdateSource::Optimistic });
        assert_eq!(ordered_ids(&cache.view(page).await.unwrap()), vec![ids[2], ids[1], ids[0]]);
        assert_eq!(ordered_ids(&store.fetch_page(page).await.unwrap()), vec![ids[2], ids[1], ids[0]]);
        assert!(cache.is_optimistic(page).await);
    }

    #[tokio::test]
    async fn test_failure_revalidates_instead_of_rollback() {
        let (store, cache, page, ids) = setup(2).await;
        let prior = cache.view(page).await.unwrap();
        store.fail_next("permission denied").await;

        let err = cache.run(page, Command::toggle_like(&prior, ids[0], "u1")).await.unwrap_err();
        assert_eq!(err.message, "permission denied");

        let view = cache.view(page).await.unwrap();
        assert!(!view[0].reactions.has(ReactionKind::Like, "u1"));
        assert!(!cache.is_optimistic(page).await);
    }

    #[tokio::test]
    async fn test_mutate_with_revalidate() {
        let (_store, cache, page, ids) = setup(2).await;
        let mut fake = cache.view(page).await.unwrap();
        fake[0].name = Some("local only".into());

        cache.mutate(page, fake, MutateOptions { revalidate: true }).await.unwrap();
        let view = cache.view(page).await.unwrap();
        assert_eq!(view[0].id, ids[0]);
        assert_eq!(view[0].name, None);
    }

    #[tokio::test]
    async fn test_revalidate_ignores_evicted_page() {
        let (_store, cache, page, _) = setup(1).await;
        assert!(cache.evict(page).await);
        cache.revalidate(page).await.unwrap();
        assert!(cache.view(page).await.is_none());
        assert!(cache.held_pages().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_is_fire_and_forget() {
        let (store, cache, page, ids) = setup(2).await;
        let prior = cache.view(page).await.unwrap();
        let handle = cache.submit(page, Command::update(&prior, ids[1], ArtifactPatch::rename("B"))).await;
        handle.await.unwrap().unwrap();
        assert_eq!(store.get(ids[1]).await.unwrap().name.as_deref(), Some("B"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_submit_shows_optimistic_view_before_store() {
        let (store, cache, page, ids) = setup(3).await;
        let prior = cache.view(page).await.unwrap();
        let reversed = vec![ids[2], ids[1], ids[0]];

        // The spawned task cannot run before this task yields
        let handle = cache.submit(page, Command::reorder(&prior, reversed.clone())).await;
        assert_eq!(ordered_ids(&cache.view(page).await.unwrap()), reversed);
        assert!(cache.is_optimistic(page).await);
        assert_eq!(ordered_ids(&store.fetch_page(page).await.unwrap()), ids);

        handle.await.unwrap().unwrap();
        assert_eq!(ordered_ids(&store.fetch_page(page).await.unwrap()), reversed);
    }

    #[tokio::test]
    async fn test_command_on_unheld_page_leaves_no_view() {
        let (store, cache, page, ids) = setup(2).await;
        let prior = cache.view(page).await.unwrap();
        assert!(cache.evict(page).await);

        let handle = cache.submit(page, Command::toggle_like(&prior, ids[0], "u1")).await;
        handle.await.unwrap().unwrap();
        assert!(cache.held_pages().await.is_empty());
        assert!(cache.view(page).await.is_none());
        assert!(store.get(ids[0]).await.unwrap().reactions.has(ReactionKind::Like, "u1"));

        // A failing command on an unheld page does not bring it back either
        store.fail_next("offline").await;
        assert!(cache.run(page, Command::delete(&prior, ids[1])).await.is_err());
        assert!(cache.view(page).await.is_none());
    }
}
