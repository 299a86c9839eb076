//! In-process cluster — an in-memory object store per kind that implements
//! [`WatchSource`].
//!
//! Used by tests and by the daemon's local mode. Each [`MemoryStore`] is
//! scoped to one namespace: objects from other namespaces are stored but never
//! listed or streamed to its watchers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use deployd_core::BoxFuture;

use crate::cluster::ClusterSources;
use crate::error::{ReconcileError, ReconcileResult};
use crate::objects::{IngressRoute, NetworkService, Resource, Workload};
use crate::source::{WatchEvent, WatchSource};

/// Object store for one kind.
pub struct MemoryStore<K: Resource> {
    namespace: String,
    objects: Mutex<HashMap<String, K>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<WatchEvent<K>>>>,
    next_uid: Arc<AtomicU64>,
}

impl<K: Resource> MemoryStore<K> {
    pub fn new(namespace: &str) -> Self {
        Self::with_uid_counter(namespace, Arc::new(AtomicU64::new(1)))
    }

    fn with_uid_counter(namespace: &str, next_uid: Arc<AtomicU64>) -> Self {
        Self {
            namespace: namespace.to_string(),
            objects: Mutex::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            next_uid,
        }
    }

    /// Create a new object, assigning it a uid. Fails if the key exists.
    pub fn create(&self, mut object: K) -> ReconcileResult<K> {
        let key = object.key();
        let mut objects = self.objects.lock().expect("store lock");
        if objects.contains_key(&key) {
            return Err(ReconcileError::AlreadyExists(format!("{} {key}", K::KIND)));
        }
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        object.meta_mut().uid = format!("uid-{uid:06}");
        objects.insert(key.clone(), object.clone());
        self.broadcast(WatchEvent::Added(object.clone()));
        drop(objects);

        debug!(kind = K::KIND, %key, uid = %object.meta().uid, "object created");
        Ok(object)
    }

    /// Insert or replace an object as-is. Returns `true` if it was new.
    pub fn upsert(&self, object: K) -> bool {
        let key = object.key();
        let mut objects = self.objects.lock().expect("store lock");
        let added = objects.insert(key, object.clone()).is_none();
        let event = if added {
            WatchEvent::Added(object)
        } else {
            WatchEvent::Modified(object)
        };
        self.broadcast(event);
        added
    }

    /// Apply `f` to a stored object and publish the change.
    pub fn update<F>(&self, key: &str, f: F) -> Option<K>
    where
        F: FnOnce(&mut K),
    {
        let mut objects = self.objects.lock().expect("store lock");
        let object = objects.get_mut(key)?;
        f(object);
        let updated = object.clone();
        self.broadcast(WatchEvent::Modified(updated.clone()));
        Some(updated)
    }

    pub fn delete(&self, key: &str) -> Option<K> {
        let mut objects = self.objects.lock().expect("store lock");
        let removed = objects.remove(key);
        if let Some(object) = &removed {
            self.broadcast(WatchEvent::Deleted(object.clone()));
            debug!(kind = K::KIND, %key, "object deleted");
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<K> {
        self.objects.lock().expect("store lock").get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End every open watch stream, as a dropped connection would.
    pub fn close_watches(&self) {
        self.watchers.lock().expect("watchers lock").clear();
    }

    /// Publish `event`. Callers hold the objects lock so that watchers see
    /// changes to a key in the order they were applied.
    fn broadcast(&self, event: WatchEvent<K>) {
        if event.object().meta().namespace != self.namespace {
            return;
        }
        let mut watchers = self.watchers.lock().expect("watchers lock");
        watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<K: Resource> WatchSource<K> for MemoryStore<K> {
    fn list(&self) -> BoxFuture<'_, ReconcileResult<Vec<K>>> {
        Box::pin(async move {
            let objects = self.objects.lock().expect("store lock");
            Ok(objects
                .values()
                .filter(|o| o.meta().namespace == self.namespace)
                .cloned()
                .collect())
        })
    }

    fn watch(&self) -> BoxFuture<'_, ReconcileResult<mpsc::UnboundedReceiver<WatchEvent<K>>>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.watchers.lock().expect("watchers lock").push(tx);
            Ok(rx)
        })
    }
}

/// An in-memory cluster holding every watched kind.
#[derive(Clone)]
pub struct MemoryCluster {
    namespace: String,
    workloads: Arc<MemoryStore<Workload>>,
    services: Arc<MemoryStore<NetworkService>>,
    ingresses: Arc<MemoryStore<IngressRoute>>,
}

impl MemoryCluster {
    pub fn new(namespace: &str) -> Self {
        // uids are unique across kinds, like a real cluster.
        let uids = Arc::new(AtomicU64::new(1));
        Self {
            namespace: namespace.to_string(),
            workloads: Arc::new(MemoryStore::with_uid_counter(namespace, uids.clone())),
            services: Arc::new(MemoryStore::with_uid_counter(namespace, uids.clone())),
            ingresses: Arc::new(MemoryStore::with_uid_counter(namespace, uids)),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn workloads(&self) -> &Arc<MemoryStore<Workload>> {
        &self.workloads
    }

    pub fn services(&self) -> &Arc<MemoryStore<NetworkService>> {
        &self.services
    }

    pub fn ingresses(&self) -> &Arc<MemoryStore<IngressRoute>> {
        &self.ingresses
    }

    /// Watch sources for a [`ClusterController`](crate::ClusterController).
    pub fn sources(&self) -> ClusterSources {
        ClusterSources {
            workloads: self.workloads.clone(),
            services: self.services.clone(),
            ingresses: self.ingresses.clone(),
        }
    }
}
