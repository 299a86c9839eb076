//! Reconciliation controller — the generic engine, one instance per kind.
//!
//! `run` spawns the informer, waits for the initial cache sync, then starts
//! `threadiness` workers that pull keys off the [`WorkQueue`] and feed the
//! readiness outcome into the [`ResourceStatusTracker`]. It returns once the
//! shutdown signal fired and every worker has exited.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use deployd_core::ConfigError;
use deployd_core::config::ReconcileConfig;
use deployd_monitor::ResourceStatusTracker;

use crate::backoff::ItemBackoff;
use crate::cache::Cache;
use crate::checker::{Readiness, ReadinessChecker};
use crate::error::{ReconcileError, ReconcileResult};
use crate::informer::Informer;
use crate::objects::Resource;
use crate::reporter::{ErrorReporter, LogReporter};
use crate::source::WatchSource;
use crate::workqueue::WorkQueue;

/// Tuning for one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Number of concurrent workers.
    pub threadiness: usize,
    /// Attempts per key before it is dropped and reported.
    pub max_retries: u32,
    pub cache_sync_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Retry keys whose resource is not registered with the tracker yet.
    /// When the retries run out such a key is dropped without a report.
    pub requeue_unregistered: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            threadiness: 1,
            max_retries: 5,
            cache_sync_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
            requeue_unregistered: true,
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &ReconcileConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            threadiness: config.threadiness.max(1),
            max_retries: config.max_retries.max(1),
            cache_sync_timeout: config.cache_sync_timeout()?,
            backoff_base: config.backoff_base()?,
            backoff_max: config.backoff_max()?,
            requeue_unregistered: config.requeue_unregistered,
        })
    }
}

pub struct Controller<C: ReadinessChecker> {
    checker: C,
    source: Arc<dyn WatchSource<C::Object>>,
    cache: Arc<Cache<C::Object>>,
    queue: Arc<WorkQueue>,
    tracker: ResourceStatusTracker,
    reporter: Arc<dyn ErrorReporter>,
    settings: ControllerSettings,
}

impl<C: ReadinessChecker> Controller<C> {
    pub fn new(
        checker: C,
        source: Arc<dyn WatchSource<C::Object>>,
        tracker: ResourceStatusTracker,
        settings: ControllerSettings,
    ) -> Self {
        let backoff = ItemBackoff::new(settings.backoff_base, settings.backoff_max);
        Self {
            checker,
            source,
            cache: Arc::new(Cache::new()),
            queue: Arc::new(WorkQueue::new(backoff)),
            tracker,
            reporter: Arc::new(LogReporter),
            settings,
        }
    }

    /// Replace the default [`LogReporter`].
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn kind(&self) -> &'static str {
        C::Object::KIND
    }

    pub fn cache(&self) -> &Arc<Cache<C::Object>> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> ReconcileResult<()> {
        let kind = self.kind();
        info!(kind, threadiness = self.settings.threadiness, "starting controller");

        let informer = Informer::new(self.source.clone(), self.cache.clone(), self.queue.clone());
        let informer_handle = tokio::spawn(informer.run(shutdown.clone()));

        let timeout = self.settings.cache_sync_timeout;
        tokio::select! {
            synced = tokio::time::timeout(timeout, self.cache.wait_synced()) => {
                if synced.is_err() {
                    warn!(kind, ?timeout, "cache did not sync");
                    self.queue.shutdown();
                    informer_handle.abort();
                    return Err(ReconcileError::CacheSyncTimeout { kind, timeout });
                }
            }
            _ = stop_requested(&mut shutdown) => {
                info!(kind, "shutdown requested before cache sync");
                self.queue.shutdown();
                let _ = informer_handle.await;
                return Ok(());
            }
        }

        let mut workers = JoinSet::new();
        for worker in 0..self.settings.threadiness {
            let this = Arc::clone(&self);
            workers.spawn(async move {
                while this.process_next().await {}
                trace!(kind = C::Object::KIND, worker, "worker exited");
            });
        }
        info!(kind, "controller started");

        stop_requested(&mut shutdown).await;
        info!(kind, "shutting down controller");
        self.queue.shutdown();

        if let Err(e) = informer_handle.await {
            warn!(kind, error = %e, "informer task failed");
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(kind, error = %e, "worker task failed");
            }
        }

        info!(kind, "controller stopped");
        Ok(())
    }

    /// Process one key. Returns `false` once the queue is shut down and empty.
    async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = self.reconcile(&key);
        self.handle_result(&key, result);
        self.queue.done(&key);
        true
    }

    fn reconcile(&self, key: &str) -> ReconcileResult<()> {
        let kind = self.kind();

        let Some(object) = self.cache.get(key) else {
            debug!(kind, key, "object no longer exists");
            return Ok(());
        };
        let Some(identity) = object.meta().identity() else {
            trace!(kind, key, "object not managed by deployd, skipping");
            return Ok(());
        };

        match self.checker.check(&object)? {
            Readiness::NotReady => {
                debug!(kind, key, %identity, "not ready yet");
                Ok(())
            }
            Readiness::Status { status, info, endpoint } => {
                if self
                    .tracker
                    .set_status(&identity, status, &info, endpoint.as_deref())
                {
                    debug!(kind, key, %identity, %status, "status recorded");
                    Ok(())
                } else if self.settings.requeue_unregistered {
                    Err(ReconcileError::Unregistered(identity))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn handle_result(&self, key: &str, result: ReconcileResult<()>) {
        let error = match result {
            Ok(()) => {
                self.queue.forget(key);
                return;
            }
            Err(e) => e,
        };

        let kind = self.kind();
        let attempts = self.queue.num_requeues(key) + 1;
        if attempts < self.settings.max_retries {
            debug!(kind, key, attempts, error = %error, "reconcile failed, requeueing");
            self.queue.add_rate_limited(key);
            return;
        }

        self.queue.forget(key);
        if let ReconcileError::Unregistered(identity) = &error {
            // Left over from a previous run, or removed from the tracker.
            debug!(kind, key, %identity, "resource not tracked, dropping key");
        } else {
            self.reporter.report(kind, key, &error);
        }
    }
}

/// Resolve once shutdown is requested or the sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use deployd_core::{
        BoxFuture, LABEL_APP_INSTANCE_ID, LABEL_SERVICE_ID, ResourceIdentity, ResourceStatus,
    };
    use tokio::sync::mpsc;

    use crate::checker::WorkloadChecker;
    use crate::memory::MemoryStore;
    use crate::objects::{ObjectMeta, Workload, WorkloadStatus};
    use crate::source::WatchEvent;

    fn fast_settings() -> ControllerSettings {
        ControllerSettings {
            threadiness: 2,
            max_retries: 5,
            cache_sync_timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(50),
            requeue_unregistered: true,
        }
    }

    fn labelled(name: &str) -> Workload {
        Workload {
            meta: ObjectMeta::new("apps", name)
                .with_label(LABEL_APP_INSTANCE_ID, "app-1")
                .with_label(LABEL_SERVICE_ID, name),
            replicas: 1,
            ..Default::default()
        }
    }

    fn ready() -> WorkloadStatus {
        WorkloadStatus {
            available_replicas: 1,
            unavailable_replicas: 0,
            conditions: vec![],
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<String>>,
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, _kind: &str, key: &str, _error: &ReconcileError) {
            self.reports.lock().unwrap().push(key.to_string());
        }
    }

    /// Fails every check and counts attempts.
    struct FailingChecker {
        calls: Arc<AtomicUsize>,
    }

    impl ReadinessChecker for FailingChecker {
        type Object = Workload;

        fn check(&self, object: &Workload) -> ReconcileResult<Readiness> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ReconcileError::Check {
                key: object.key(),
                reason: "platform unreachable".to_string(),
            })
        }
    }

    /// A source whose listing never completes.
    struct StuckSource;

    impl WatchSource<Workload> for StuckSource {
        fn list(&self) -> BoxFuture<'_, ReconcileResult<Vec<Workload>>> {
            Box::pin(std::future::pending())
        }

        fn watch(
            &self,
        ) -> BoxFuture<'_, ReconcileResult<mpsc::UnboundedReceiver<WatchEvent<Workload>>>> {
            Box::pin(async {
                let (_tx, rx) = mpsc::unbounded_channel();
                Ok(rx)
            })
        }
    }

    async fn wait_for_status(
        tracker: &ResourceStatusTracker,
        identity: &ResourceIdentity,
        expected: ResourceStatus,
    ) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if tracker.get(identity).map(|r| r.status) == Some(expected) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{identity} never reached {expected}"));
    }

    #[tokio::test]
    async fn ready_workload_reaches_running() {
        let store = Arc::new(MemoryStore::<Workload>::new("apps"));
        let tracker = ResourceStatusTracker::new();
        let controller = Arc::new(Controller::new(
            WorkloadChecker,
            store.clone(),
            tracker.clone(),
            fast_settings(),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(rx));

        let created = store.create(labelled("web")).unwrap();
        let identity = created.meta.identity().unwrap();
        tracker.register(identity.clone(), "stage-1");

        store.update("apps/web", |w| w.status = ready());
        wait_for_status(&tracker, &identity, ResourceStatus::Running).await;

        tx.send_replace(true);
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failing_key_is_retried_then_reported_once() {
        let store = Arc::new(MemoryStore::<Workload>::new("apps"));
        let calls = Arc::new(AtomicUsize::new(0));
        let reporter = Arc::new(RecordingReporter::default());
        let controller = Arc::new(
            Controller::new(
                FailingChecker { calls: calls.clone() },
                store.clone(),
                ResourceStatusTracker::new(),
                fast_settings(),
            )
            .with_reporter(reporter.clone()),
        );
        let (tx, rx) = watch::channel(false);
        tokio::spawn(controller.run(rx));

        store.create(labelled("broken")).unwrap();

        // 5 + 10 + 20 + 40 ms of backoff, with plenty of slack.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(*reporter.reports.lock().unwrap(), vec!["apps/broken".to_string()]);

        tx.send_replace(true);
    }

    #[tokio::test]
    async fn watch_event_during_backoff_does_not_extend_retries() {
        let store = Arc::new(MemoryStore::<Workload>::new("apps"));
        let calls = Arc::new(AtomicUsize::new(0));
        let reporter = Arc::new(RecordingReporter::default());
        let settings = ControllerSettings {
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_millis(400),
            ..fast_settings()
        };
        let controller = Arc::new(
            Controller::new(
                FailingChecker { calls: calls.clone() },
                store.clone(),
                ResourceStatusTracker::new(),
                settings,
            )
            .with_reporter(reporter.clone()),
        );
        let (tx, rx) = watch::channel(false);
        tokio::spawn(controller.run(rx));

        store.create(labelled("broken")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Lands while the first retry is still backing off.
        store.update("apps/broken", |w| w.replicas = 2);

        // 50 + 200 + 400 ms of retries after the update, with slack.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(reporter.reports.lock().unwrap().len(), 1);

        tx.send_replace(true);
    }

    #[tokio::test]
    async fn untracked_resource_is_dropped_without_report() {
        let store = Arc::new(MemoryStore::<Workload>::new("apps"));
        let tracker = ResourceStatusTracker::new();
        let reporter = Arc::new(RecordingReporter::default());
        let controller = Arc::new(
            Controller::new(WorkloadChecker, store.clone(), tracker.clone(), fast_settings())
                .with_reporter(reporter.clone()),
        );
        let queue = controller.queue().clone();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(controller.run(rx));

        let created = store.create(labelled("web")).unwrap();
        let identity = created.meta.identity().unwrap();
        tracker.register(identity.clone(), "stage-1");
        tracker.remove(&identity);
        store.update("apps/web", |w| w.status = ready());

        // 5 + 10 + 20 + 40 ms of backoff, with plenty of slack.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(reporter.reports.lock().unwrap().is_empty());
        assert!(tracker.is_empty());
        assert_eq!(queue.num_requeues("apps/web"), 0);
        assert!(!queue.is_waiting("apps/web"));

        tx.send_replace(true);
    }

    #[tokio::test]
    async fn status_before_registration_is_retried() {
        let store = Arc::new(MemoryStore::<Workload>::new("apps"));
        let tracker = ResourceStatusTracker::new();
        let reporter = Arc::new(RecordingReporter::default());
        let controller = Arc::new(
            Controller::new(WorkloadChecker, store.clone(), tracker.clone(), fast_settings())
                .with_reporter(reporter.clone()),
        );
        let (tx, rx) = watch::channel(false);
        tokio::spawn(controller.run(rx));

        let mut workload = labelled("early");
        workload.status = ready();
        let created = store.create(workload).unwrap();
        let identity = created.meta.identity().unwrap();

        tokio::time::sleep(Duration::from_millis(8)).await;
        tracker.register(identity.clone(), "stage-1");

        wait_for_status(&tracker, &identity, ResourceStatus::Running).await;
        assert!(reporter.reports.lock().unwrap().is_empty());

        tx.send_replace(true);
    }

    #[tokio::test]
    async fn unlabelled_and_deleted_objects_are_skipped() {
        let store = Arc::new(MemoryStore::<Workload>::new("apps"));
        let tracker = ResourceStatusTracker::new();
        let reporter = Arc::new(RecordingReporter::default());
        let controller = Arc::new(
            Controller::new(WorkloadChecker, store.clone(), tracker.clone(), fast_settings())
                .with_reporter(reporter.clone()),
        );
        let (tx, rx) = watch::channel(false);
        tokio::spawn(controller.run(rx));

        let mut foreign = Workload {
            meta: ObjectMeta::new("apps", "foreign"),
            ..Default::default()
        };
        foreign.status = ready();
        store.create(foreign).unwrap();

        let created = store.create(labelled("web")).unwrap();
        let identity = created.meta.identity().unwrap();
        tracker.register(identity.clone(), "stage-1");
        store.update("apps/web", |w| w.status = ready());
        wait_for_status(&tracker, &identity, ResourceStatus::Running).await;

        store.delete("apps/web");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(&identity).unwrap().status, ResourceStatus::Running);
        assert!(reporter.reports.lock().unwrap().is_empty());

        tx.send_replace(true);
    }

    #[tokio::test]
    async fn cache_sync_timeout_is_fatal() {
        let settings = ControllerSettings {
            cache_sync_timeout: Duration::from_millis(50),
            ..fast_settings()
        };
        let controller = Arc::new(Controller::new(
            WorkloadChecker,
            Arc::new(StuckSource),
            ResourceStatusTracker::new(),
            settings,
        ));
        let (_tx, rx) = watch::channel(false);

        let err = tokio::time::timeout(Duration::from_secs(1), controller.run(rx))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err,
            ReconcileError::CacheSyncTimeout {
                kind: "workload",
                timeout: Duration::from_millis(50),
            }
        );
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let store = Arc::new(MemoryStore::<Workload>::new("apps"));
        let controller = Arc::new(Controller::new(
            WorkloadChecker,
            store,
            ResourceStatusTracker::new(),
            fast_settings(),
        ));
        let queue = controller.queue().clone();
        let cache = controller.cache().clone();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(rx));

        cache.wait_synced().await;
        tx.send_replace(true);

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(queue.is_shutting_down());
    }

    #[test]
    fn settings_from_config() {
        let config = ReconcileConfig {
            threadiness: 3,
            cache_sync_timeout: "2s".to_string(),
            ..Default::default()
        };
        let settings = ControllerSettings::from_config(&config).unwrap();
        assert_eq!(settings.threadiness, 3);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.cache_sync_timeout, Duration::from_secs(2));
        assert_eq!(settings.backoff_base, Duration::from_millis(5));

        let bad = ReconcileConfig {
            backoff_max: "soon".to_string(),
            ..Default::default()
        };
        assert!(ControllerSettings::from_config(&bad).is_err());
    }
}
