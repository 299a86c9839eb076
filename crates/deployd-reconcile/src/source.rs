//! Watch source capability — where controllers get their objects from.

use tokio::sync::mpsc;

use deployd_core::BoxFuture;

use crate::error::ReconcileResult;
use crate::objects::Resource;

/// A change notification for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    /// Carries the last known state of the deleted object.
    Deleted(K),
}

impl<K: Resource> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Lists and watches objects of one kind in one namespace.
///
/// The informer subscribes with `watch` before calling `list`, so events
/// racing the listing are delivered afterwards rather than lost. A closed
/// event channel makes the informer re-list.
pub trait WatchSource<K: Resource>: Send + Sync {
    fn list(&self) -> BoxFuture<'_, ReconcileResult<Vec<K>>>;

    fn watch(&self) -> BoxFuture<'_, ReconcileResult<mpsc::UnboundedReceiver<WatchEvent<K>>>>;
}
