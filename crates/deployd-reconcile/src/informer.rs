//! Informer — keeps a [`Cache`] in step with a [`WatchSource`].
//!
//! Every notification updates the cache and enqueues the object's key. When
//! the watch stream ends or fails, the informer re-lists after a backoff
//! (1s doubling up to 30s) and carries on. The backoff starts over after
//! every cycle that got as far as a full list.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::error::{ReconcileError, ReconcileResult};
use crate::objects::Resource;
use crate::source::{WatchEvent, WatchSource};
use crate::workqueue::WorkQueue;

const RELIST_BASE: Duration = Duration::from_secs(1);
const RELIST_MAX: Duration = Duration::from_secs(30);

/// How a list + watch cycle ended.
enum CycleEnd {
    Shutdown,
    /// The stream closed after the cache was filled.
    StreamClosed,
}

pub struct Informer<K: Resource> {
    source: Arc<dyn WatchSource<K>>,
    cache: Arc<Cache<K>>,
    queue: Arc<WorkQueue>,
    relist_base: Duration,
    relist_max: Duration,
}

impl<K: Resource> Informer<K> {
    pub fn new(
        source: Arc<dyn WatchSource<K>>,
        cache: Arc<Cache<K>>,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            source,
            cache,
            queue,
            relist_base: RELIST_BASE,
            relist_max: RELIST_MAX,
        }
    }

    pub fn with_relist_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.relist_base = base;
        self.relist_max = max;
        self
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut relist_delay = self.relist_base;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.list_and_watch(&mut shutdown).await {
                Ok(CycleEnd::Shutdown) => break,
                Ok(CycleEnd::StreamClosed) => {
                    relist_delay = self.relist_base;
                    warn!(
                        kind = K::KIND,
                        delay = ?relist_delay,
                        "watch stream closed, re-listing"
                    );
                }
                Err(e) => {
                    warn!(
                        kind = K::KIND,
                        error = %e,
                        delay = ?relist_delay,
                        "watch interrupted, re-listing"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(relist_delay) => {}
                _ = shutdown.changed() => break,
            }
            relist_delay = (relist_delay * 2).min(self.relist_max);
        }

        debug!(kind = K::KIND, "informer stopped");
    }

    /// One list + watch cycle.
    async fn list_and_watch(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ReconcileResult<CycleEnd> {
        let mut events = self.source.watch().await?;
        let listed = self.source.list().await?;

        let count = listed.len();
        for key in self.cache.replace(listed) {
            self.queue.add(&key);
        }
        if !self.cache.has_synced() {
            info!(kind = K::KIND, objects = count, "cache synced");
        }
        self.cache.mark_synced();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => return Ok(CycleEnd::StreamClosed),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(CycleEnd::Shutdown);
                    }
                }
            }
        }
    }

    fn apply(&self, event: WatchEvent<K>) {
        let key = match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => self.cache.upsert(object),
            WatchEvent::Deleted(object) => {
                let key = object.key();
                self.cache.remove(&key);
                key
            }
        };
        debug!(kind = K::KIND, %key, "object changed");
        self.queue.add(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use deployd_core::BoxFuture;
    use tokio::sync::mpsc;

    use crate::memory::MemoryStore;
    use crate::objects::{NetworkService, ObjectMeta};

    fn svc(name: &str) -> NetworkService {
        NetworkService {
            meta: ObjectMeta::new("apps", name),
            ..Default::default()
        }
    }

    async fn drain(queue: &WorkQueue, n: usize) -> Vec<String> {
        let mut keys = Vec::new();
        for _ in 0..n {
            let key = tokio::time::timeout(Duration::from_secs(1), queue.get())
                .await
                .unwrap()
                .unwrap();
            queue.done(&key);
            keys.push(key);
        }
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn initial_list_fills_cache_and_queue() {
        let store = Arc::new(MemoryStore::<NetworkService>::new("apps"));
        store.upsert(svc("a"));
        store.upsert(svc("b"));

        let cache = Arc::new(Cache::new());
        let queue = Arc::new(WorkQueue::default());
        let (tx, rx) = watch::channel(false);
        let informer = Informer::new(store.clone(), cache.clone(), queue.clone());
        let handle = tokio::spawn(informer.run(rx));

        tokio::time::timeout(Duration::from_secs(1), cache.wait_synced())
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(drain(&queue, 2).await, vec!["apps/a", "apps/b"]);

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn events_update_cache_and_enqueue() {
        let store = Arc::new(MemoryStore::<NetworkService>::new("apps"));
        let cache = Arc::new(Cache::new());
        let queue = Arc::new(WorkQueue::default());
        let (tx, rx) = watch::channel(false);
        tokio::spawn(Informer::new(store.clone(), cache.clone(), queue.clone()).run(rx));
        cache.wait_synced().await;

        store.upsert(svc("web"));
        assert_eq!(drain(&queue, 1).await, vec!["apps/web"]);
        assert!(cache.get("apps/web").is_some());

        store.delete("apps/web");
        assert_eq!(drain(&queue, 1).await, vec!["apps/web"]);
        assert!(cache.get("apps/web").is_none());

        tx.send_replace(true);
    }

    #[tokio::test]
    async fn closed_watch_triggers_relist() {
        let store = Arc::new(MemoryStore::<NetworkService>::new("apps"));
        let cache = Arc::new(Cache::new());
        let queue = Arc::new(WorkQueue::default());
        let (tx, rx) = watch::channel(false);
        tokio::spawn(Informer::new(store.clone(), cache.clone(), queue.clone()).run(rx));
        cache.wait_synced().await;

        store.close_watches();
        // Created while no watch is open: only the re-list can see it.
        store.upsert(svc("missed"));

        let key = tokio::time::timeout(Duration::from_secs(3), queue.get())
            .await
            .unwrap();
        assert_eq!(key.as_deref(), Some("apps/missed"));
        assert!(cache.get("apps/missed").is_some());

        tx.send_replace(true);
    }

    /// Lists nothing, and every watch stream it opens is already closed.
    struct ClosingSource {
        lists: Arc<AtomicUsize>,
    }

    impl WatchSource<NetworkService> for ClosingSource {
        fn list(&self) -> BoxFuture<'_, ReconcileResult<Vec<NetworkService>>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Vec::new()) })
        }

        fn watch(
            &self,
        ) -> BoxFuture<'_, ReconcileResult<mpsc::UnboundedReceiver<WatchEvent<NetworkService>>>> {
            Box::pin(async {
                let (_tx, rx) = mpsc::unbounded_channel();
                Ok(rx)
            })
        }
    }

    #[tokio::test]
    async fn relist_delay_resets_after_successful_list() {
        let lists = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(ClosingSource { lists: lists.clone() });
        let informer =
            Informer::new(source, Arc::new(Cache::new()), Arc::new(WorkQueue::default()))
                .with_relist_backoff(Duration::from_millis(20), Duration::from_secs(5));
        let (tx, rx) = watch::channel(false);
        tokio::spawn(informer.run(rx));

        // Doubling from 20ms would allow about five lists in this window.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let lists = lists.load(Ordering::SeqCst);
        assert!(lists >= 10, "lists: {lists}");

        tx.send_replace(true);
    }
}
