use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use propagator_core::propagation::FINALIZER;
use propagator_core::{
    ConfigMapPropagation, DeletionPolicy, SyncMode, TargetKey, TargetsSummary, Timestamp, now_utc,
};
use propagator_storage::DynStore;
use tracing::Instrument;

use super::actual::discover_current;
use super::desired::resolve_desired;
use super::diff::TargetPlan;
use super::error::ReconcileError;
use super::mutate::{TargetMutator, TargetOperation};
use super::recorder::Recorder;
use super::schedule::{self, Resync, Wake};
use super::status::{self, TargetResult};
use crate::metrics;

/// Source of "now" for scheduling and status timestamps.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// What the controller should do with the key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing scheduled; the next change notification triggers a pass.
    AwaitChange,
    Requeue(Duration),
    /// Look again soon, rate limited by the work queue.
    Recheck,
}

impl From<Wake> for Action {
    fn from(wake: Wake) -> Self {
        match wake {
            Wake::Immediately => Action::Recheck,
            Wake::After(delay) => Action::Requeue(delay),
            Wake::Never => Action::AwaitChange,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Namespaces skipped when a propagation disallows system namespaces.
    pub system_namespaces: Vec<String>,
    /// Upper bound on concurrent target mutations within one pass.
    pub target_concurrency: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            system_namespaces: vec![
                "kube-system".into(),
                "kube-public".into(),
                "kube-node-lease".into(),
            ],
            target_concurrency: 8,
        }
    }
}

/// Drives the targets of one propagation toward its spec.
///
/// Passes for the same propagation must not overlap; the controller's work
/// queue guarantees that. Passes for different propagations may run
/// concurrently against the same store.
pub struct Reconciler {
    pub(crate) store: DynStore,
    pub(crate) recorder: Recorder,
    pub(crate) settings: ReconcilerSettings,
    clock: Clock,
}

impl Reconciler {
    pub fn new(store: DynStore, recorder: Recorder, settings: ReconcilerSettings) -> Self {
        Self {
            store,
            recorder,
            settings,
            clock: Arc::new(now_utc),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn now(&self) -> Timestamp {
        (self.clock)()
    }

    /// Runs one reconciliation pass for `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ReconcileError> {
        let span = tracing::info_span!("reconcile", propagation = %format!("{namespace}/{name}"));
        self.reconcile_inner(namespace, name).instrument(span).await
    }

    async fn reconcile_inner(&self, namespace: &str, name: &str) -> Result<Action, ReconcileError> {
        let Some(mut propagation) = self.store.get_propagation(namespace, name).await? else {
            tracing::debug!("propagation no longer exists");
            return Ok(Action::AwaitChange);
        };

        if propagation.metadata.is_deleting() {
            self.finalize(&propagation).await?;
            return Ok(Action::AwaitChange);
        }

        if propagation.metadata.add_finalizer(FINALIZER) {
            tracing::debug!("adding finalizer");
            propagation = self.store.update_propagation(&propagation).await?;
        }

        if propagation.spec.sync_mode == SyncMode::Unknown {
            tracing::warn!("unrecognized sync mode, propagation will not be synced");
        }
        match schedule::evaluate(&propagation, self.now()) {
            Resync::Due => {}
            Resync::NotDue(wake) => {
                tracing::debug!(?wake, "resync not due");
                return Ok(wake.into());
            }
        }

        let source = &propagation.spec.source;
        let found = self
            .store
            .get_config_map(source.namespace(), &source.name)
            .await?;
        if found.is_none() {
            let err = ReconcileError::SourceNotFound {
                source_key: format!("{}/{}", source.namespace(), source.name),
            };
            self.abort(&propagation, &err).await;
            return Err(err);
        }

        let summary = match self.sync_targets(&propagation).await {
            Ok(summary) => summary,
            Err(err @ (ReconcileError::SyncFailed { .. } | ReconcileError::Store(_))) => {
                return Err(err);
            }
            Err(err) => {
                self.abort(&propagation, &err).await;
                return Err(err);
            }
        };
        tracing::info!(
            total = summary.total,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            orphaned = summary.orphaned,
            "propagation synced"
        );

        // Decide the next wake from the status just written.
        let mut synced = propagation;
        synced.status.synced_generation = Some(synced.metadata.generation);
        synced.status.last_synced_at = Some(self.now());
        synced.status.last_successful_sync = synced.status.last_synced_at;
        Ok(match schedule::evaluate(&synced, self.now()) {
            Resync::Due => Action::Recheck,
            Resync::NotDue(wake) => wake.into(),
        })
    }

    /// Computes desired and current targets, applies the diff and records
    /// the outcome in status.
    ///
    /// Fails with [`ReconcileError::SyncFailed`] when any target failed,
    /// after the partial progress has been persisted.
    pub async fn sync_targets(
        &self,
        propagation: &ConfigMapPropagation,
    ) -> Result<TargetsSummary, ReconcileError> {
        let store = self.store.as_ref();
        let source = &propagation.spec.source;
        let source_version = store
            .get_config_map(source.namespace(), &source.name)
            .await?
            .map(|cm| cm.metadata.resource_version);
        let desired =
            resolve_desired(store, propagation, &self.settings.system_namespaces).await?;
        let current = discover_current(store, propagation).await?;
        let plan = TargetPlan::compute(&desired, &current);
        tracing::debug!(
            create = plan.to_create.len(),
            update = plan.to_update.len(),
            delete = plan.to_delete.len(),
            "computed target plan"
        );

        let removal = match propagation.spec.deletion_policy {
            DeletionPolicy::Delete => TargetOperation::Delete,
            DeletionPolicy::Orphan => TargetOperation::Orphan,
        };
        let jobs: Vec<(TargetKey, TargetOperation)> = plan
            .to_create
            .into_iter()
            .map(|k| (k, TargetOperation::Create))
            .chain(plan.to_update.into_iter().map(|k| (k, TargetOperation::Update)))
            .chain(plan.to_delete.into_iter().map(|k| (k, removal)))
            .collect();

        let results = self.run_jobs(propagation, jobs).await;
        let now = self.now();
        let new_status = status::synced_status(
            propagation,
            source_version.as_deref(),
            desired.len(),
            &results,
            now,
        );
        let summary = new_status.targets_summary.unwrap_or_default();
        status::persist(store, propagation, &new_status).await?;

        if summary.failed > 0 {
            return Err(ReconcileError::SyncFailed {
                failed: summary.failed,
                targets: new_status.target_statuses.iter().map(|t| t.key()).collect(),
            });
        }
        Ok(summary)
    }

    /// Applies every job independently; one failure never stops the others.
    pub(crate) async fn run_jobs(
        &self,
        propagation: &ConfigMapPropagation,
        jobs: Vec<(TargetKey, TargetOperation)>,
    ) -> Vec<TargetResult> {
        let mutator = TargetMutator::new(self.store.as_ref(), propagation);
        let mutator = &mutator;

        let mut results: Vec<TargetResult> = stream::iter(jobs)
            .map(|(key, operation)| async move {
                let outcome = mutator.apply(operation, &key).await;
                TargetResult {
                    key,
                    operation,
                    outcome,
                }
            })
            .buffer_unordered(self.settings.target_concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.key.cmp(&b.key));

        for result in &results {
            let label = match &result.outcome {
                Ok(_) => "success",
                Err(err) => err.reason(),
            };
            metrics::record_target_operation(result.operation.as_str(), label);
            self.recorder.target_result(propagation, result);
        }
        results
    }

    /// Records an aborted pass as a warning and in the Ready condition.
    async fn abort(&self, propagation: &ConfigMapPropagation, err: &ReconcileError) {
        self.recorder.warning(propagation, err.reason(), err.to_string());
        let new_status = status::aborted_status(propagation, err, self.now());
        if let Err(e) = status::persist(self.store.as_ref(), propagation, &new_status).await {
            tracing::warn!(error = %e, "failed to record aborted pass in status");
        }
    }
}
