//! Watch-driven controller: a per-key work queue fed by store change
//! notifications and drained by a pool of reconcile workers.
//!
//! The queue guarantees that a key is never handed to two workers at once.
//! A key added while it is being processed is marked dirty and handed out
//! again once the worker calls [`WorkQueue::done`].

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use propagator_core::events::{EventBroadcaster, ResourceEvent, SystemEvent};
use propagator_core::propagation::OWNER_LABEL;
use propagator_core::resource::Resource;
use propagator_core::{ConfigMap, ConfigMapPropagation, Namespace, Selector};
use propagator_storage::{DynStore, ObjectStore, StorageError};
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::ControllerConfig;
use crate::metrics;
use crate::reconcile::{Action, Reconciler, RetryPolicy};

/// Queue key: the location of one propagation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn of(propagation: &ConfigMapPropagation) -> Self {
        Self::new(&propagation.metadata.namespace, &propagation.metadata.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// Deduplicating work queue with delayed adds and per-key backoff.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    /// Earliest pending deadline per key for delayed adds.
    delayed: DashMap<ObjectKey, Instant>,
    /// Consecutive failures per key.
    failures: DashMap<ObjectKey, u32>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl WorkQueue {
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            delayed: DashMap::new(),
            failures: DashMap::new(),
            backoff_base,
            backoff_max,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Adds `key` once `delay` has passed. An earlier pending deadline for
    /// the same key wins.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut entry = self.delayed.entry(key.clone()).or_insert(deadline);
            if *entry < deadline {
                return;
            }
            *entry = deadline;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;
            if queue
                .delayed
                .remove_if(&key, |_, pending| *pending == deadline)
                .is_some()
            {
                queue.add(key);
            }
        });
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as processed, requeueing it if it was added meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Next retry delay for `key`: `base * 2^failures`, capped at the max.
    pub fn backoff(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.entry(key.clone()).or_insert(0);
        let factor = 1u32.checked_shl(*failures).unwrap_or(u32::MAX);
        *failures = failures.saturating_add(1);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    /// Resets the failure count of `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }
}

/// Propagations that should be reconciled because of `event`.
pub async fn keys_for_event(
    store: &dyn ObjectStore,
    event: &ResourceEvent,
) -> Result<Vec<ObjectKey>, StorageError> {
    let mut keys = BTreeSet::new();
    if event.matches_kind(ConfigMapPropagation::KIND) {
        keys.insert(ObjectKey::new(&event.namespace, &event.name));
    } else if event.matches_kind(ConfigMap::KIND) {
        if let Some((namespace, name)) = event
            .labels
            .get(OWNER_LABEL)
            .and_then(|owner| owner.split_once('.'))
        {
            keys.insert(ObjectKey::new(namespace, name));
        }
        let all = store.list_propagations(None, &Selector::everything()).await?;
        keys.extend(
            all.iter()
                .filter(|p| {
                    p.spec.source.namespace() == event.namespace
                        && p.spec.source.name == event.name
                })
                .map(ObjectKey::of),
        );
    } else if event.matches_kind(Namespace::KIND) {
        let all = store.list_propagations(None, &Selector::everything()).await?;
        keys.extend(all.iter().map(ObjectKey::of));
    }
    Ok(keys.into_iter().collect())
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    broadcaster: Arc<EventBroadcaster>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        reconciler: Arc<Reconciler>,
        broadcaster: Arc<EventBroadcaster>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            reconciler,
            broadcaster,
            queue: Arc::new(WorkQueue::new(config.backoff_base(), config.backoff_max())),
            config: config.clone(),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Starts the watch and the workers after enqueueing every existing
    /// propagation.
    pub async fn spawn(self) -> Result<ControllerHandle, StorageError> {
        // Subscribe before listing so no change falls between the two.
        let events = self.broadcaster.subscribe();
        let store = self.reconciler.store.clone();
        enqueue_all(store.as_ref(), &self.queue).await?;

        let watch = tokio::spawn(watch_loop(store, Arc::clone(&self.queue), events));
        let workers = (0..self.config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&self.reconciler),
                    Arc::clone(&self.queue),
                    self.config.clone(),
                ))
            })
            .collect();
        tracing::info!(workers = self.config.workers, "controller started");

        Ok(ControllerHandle {
            queue: self.queue,
            watch,
            workers,
        })
    }
}

pub struct ControllerHandle {
    queue: Arc<WorkQueue>,
    watch: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    /// Stops accepting work and waits for in-flight reconciliations.
    pub async fn shutdown(self) {
        self.queue.shutdown();
        self.watch.abort();
        for worker in self.workers {
            let _ = worker.await;
        }
        tracing::info!("controller stopped");
    }
}

async fn enqueue_all(store: &dyn ObjectStore, queue: &WorkQueue) -> Result<(), StorageError> {
    let all = store.list_propagations(None, &Selector::everything()).await?;
    for p in &all {
        queue.add(ObjectKey::of(p));
    }
    tracing::debug!(count = all.len(), "enqueued all propagations");
    Ok(())
}

async fn watch_loop(
    store: DynStore,
    queue: Arc<WorkQueue>,
    mut events: tokio::sync::broadcast::Receiver<SystemEvent>,
) {
    loop {
        match events.recv().await {
            Ok(SystemEvent::Resource(event)) => match keys_for_event(store.as_ref(), &event).await {
                Ok(keys) => {
                    for key in keys {
                        queue.add(key);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, kind = %event.kind, "failed to route change notification");
                }
            },
            Ok(SystemEvent::Audit(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "watch lagged behind, requeueing everything");
                if let Err(e) = enqueue_all(store.as_ref(), &queue).await {
                    tracing::warn!(error = %e, "relist after lag failed");
                }
            }
            Err(RecvError::Closed) => break,
        }
        metrics::set_queue_depth(queue.len());
    }
}

async fn worker_loop(
    id: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
) {
    while let Some(key) = queue.get().await {
        metrics::set_queue_depth(queue.len());
        let started = Instant::now();
        let result = reconciler.reconcile(&key.namespace, &key.name).await;
        let elapsed = started.elapsed();

        match result {
            Ok(action) => {
                metrics::record_reconciliation("success", elapsed);
                match action {
                    Action::AwaitChange => queue.forget(&key),
                    Action::Requeue(delay) => {
                        queue.forget(&key);
                        queue.add_after(key.clone(), delay);
                    }
                    Action::Recheck => {
                        let delay = queue.backoff(&key);
                        queue.add_after(key.clone(), delay);
                    }
                }
            }
            Err(err) => {
                metrics::record_reconciliation(err.reason(), elapsed);
                let delay = match err.retry_policy() {
                    RetryPolicy::AwaitChange => {
                        queue.forget(&key);
                        None
                    }
                    RetryPolicy::MissingSource => {
                        Some(queue.backoff(&key).max(config.missing_source_requeue()))
                    }
                    RetryPolicy::PartialDeletion => Some(config.deletion_retry()),
                    RetryPolicy::Backoff => Some(queue.backoff(&key)),
                };
                tracing::warn!(
                    worker = id,
                    propagation = %key,
                    error = %err,
                    retry_in = ?delay,
                    "reconciliation failed"
                );
                if let Some(delay) = delay {
                    queue.add_after(key.clone(), delay);
                }
            }
        }
        queue.done(&key);
    }
    tracing::debug!(worker = id, "worker stopped");
}
