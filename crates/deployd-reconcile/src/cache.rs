//! Local cache of watched objects, keyed by `namespace/name`.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::watch;

use crate::objects::Resource;

pub struct Cache<K> {
    objects: RwLock<HashMap<String, K>>,
    synced: watch::Sender<bool>,
}

impl<K: Resource> Cache<K> {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            objects: RwLock::new(HashMap::new()),
            synced,
        }
    }

    pub fn get(&self, key: &str) -> Option<K> {
        let objects = self.objects.read().expect("cache lock");
        objects.get(key).cloned()
    }

    /// Insert or replace an object, returning its key.
    pub fn upsert(&self, object: K) -> String {
        let key = object.key();
        let mut objects = self.objects.write().expect("cache lock");
        objects.insert(key.clone(), object);
        key
    }

    pub fn remove(&self, key: &str) -> Option<K> {
        let mut objects = self.objects.write().expect("cache lock");
        objects.remove(key)
    }

    /// Replace the whole content with a fresh listing.
    ///
    /// Returns every key whose state may have changed: all listed keys plus
    /// the keys that disappeared.
    pub fn replace(&self, listed: Vec<K>) -> Vec<String> {
        let mut fresh: HashMap<String, K> = HashMap::with_capacity(listed.len());
        for object in listed {
            fresh.insert(object.key(), object);
        }

        let mut objects = self.objects.write().expect("cache lock");
        let mut touched: Vec<String> = objects
            .keys()
            .filter(|k| !fresh.contains_key(*k))
            .cloned()
            .collect();
        touched.extend(fresh.keys().cloned());
        *objects = fresh;
        touched
    }

    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().expect("cache lock");
        objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the initial listing as complete.
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial listing completed.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so this only ends once synced.
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

impl<K: Resource> Default for Cache<K> {
    fn default() -> Self {
        Self::new()
    }
}
