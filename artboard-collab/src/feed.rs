//! Debounced page revalidation driven by the store's change feed.
//!
//! Bursts of notifications for one page (a reorder persists as one write
//! per item) collapse into a single refetch once the feed has been quiet
//! for the debounce period.

use std::sync::Arc;
use std::time::Duration;

use artboard_core::PageId;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::CacheBridge;
use crate::store::{ChangeFeed, ChangeNotification};

/// Live feed subscription for one page. Dropping it stops the task.
pub struct FeedSubscription {
    page_id: PageId,
    task: JoinHandle<()>,
}

impl FeedSubscription {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct FeedSubscriber;

impl FeedSubscriber {
    /// Watch `feed` for changes on `page_id` and revalidate `cache` after
    /// each quiet period of `debounce`.
    pub fn spawn(
        cache: Arc<CacheBridge>,
        feed: &dyn ChangeFeed,
        page_id: PageId,
        debounce: Duration,
    ) -> FeedSubscription {
        let rx = feed.subscribe();
        let task = tokio::spawn(Self::run(cache, rx, page_id, debounce));
        FeedSubscription { page_id, task }
    }

    async fn run(
        cache: Arc<CacheBridge>,
        mut rx: broadcast::Receiver<ChangeNotification>,
        page_id: PageId,
        debounce: Duration,
    ) {
        log::debug!("Watching change feed for page {page_id}");
        loop {
            // Wait for the first relevant change
            match rx.recv().await {
                Ok(n) if n.page_id() == page_id => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => log::warn!("Feed for page {page_id} lagged by {n}"),
                Err(RecvError::Closed) => break,
            }

            let mut deadline = Instant::now() + debounce;
            let mut closed = false;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    next = rx.recv() => match next {
                        Ok(n) if n.page_id() == page_id => deadline = Instant::now() + debounce,
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => deadline = Instant::now() + debounce,
                        Err(RecvError::Closed) => {
                            closed = true;
                            break;
                        }
                    },
                }
            }

            if let Err(e) = cache.revalidate(page_id).await {
                log::warn!("Feed revalidation of page {page_id} failed: {e}");
            }
            if closed {
                break;
            }
        }
        log::debug!("Change feed for page {page_id} closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheUpdate, UpdateSource};
    use crate::store::{ArtifactStore, MemoryStore};
    use artboard_core::{ordered_ids, Artifact, ArtifactType, ProjectArtifact};
    use uuid::Uuid;

    const DEBOUNCE: Duration = Duration::from_millis(100);

    async fn setup(n: usize) -> (Arc<MemoryStore>, Arc<CacheBridge>, PageId, Vec<Uuid>) {
        let store = Arc::new(MemoryStore::new(256));
        let (project, page) = (Uuid::new_v4(), Uuid::new_v4());
        let mut ids = Vec::new();
        for i in 0..n {
            let pa = ProjectArtifact::new(project, page, i as u32, Artifact::new(ArtifactType::Image, format!("a{i}"), "u"));
            ids.push(pa.id);
            store.insert(pa).await;
        }
        let cache = Arc::new(CacheBridge::new(store.clone(), 64));
        cache.load(page).await.unwrap();
        (store, cache, page, ids)
    }

    async fn authoritative_updates(rx: &mut broadcast::Receiver<CacheUpdate>) -> usize {
        let mut count = 0;
        while let Ok(update) = rx.try_recv() {
            if update.source == UpdateSource::Authoritative {
                count += 1;
            }
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_refetch() {
        let (store, cache, page, ids) = setup(5).await;
        let mut updates = cache.subscribe();
        let _sub = FeedSubscriber::spawn(cache.clone(), &*store, page, DEBOUNCE);
        tokio::task::yield_now().await;

        let reversed: Vec<Uuid> = ids.iter().rev().cloned().collect();
        store.reorder(&reversed).await.unwrap();

        tokio::time::sleep(DEBOUNCE / 2).await;
        assert_eq!(authoritative_updates(&mut updates).await, 0);

        tokio::time::sleep(DEBOUNCE).await;
        assert_eq!(authoritative_updates(&mut updates).await, 1);
        assert_eq!(ordered_ids(&cache.view(page).await.unwrap()), reversed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_pages_ignored() {
        let (store, cache, page, _) = setup(1).await;
        let mut updates = cache.subscribe();
        let _sub = FeedSubscriber::spawn(cache.clone(), &*store, page, DEBOUNCE);
        tokio::task::yield_now().await;

        let elsewhere = ProjectArtifact::new(Uuid::new_v4(), Uuid::new_v4(), 0, Artifact::new(ArtifactType::Text, "t", "u"));
        store.insert(elsewhere).await;

        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(authoritative_updates(&mut updates).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_subscription_stops() {
        let (store, cache, page, ids) = setup(2).await;
        let mut updates = cache.subscribe();
        let sub = FeedSubscriber::spawn(cache.clone(), &*store, page, DEBOUNCE);
        assert_eq!(sub.page_id(), page);
        sub.cancel();

        store.reorder(&[ids[1], ids[0]]).await.unwrap();
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(authoritative_updates(&mut updates).await, 0);
    }
}
