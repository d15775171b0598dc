//! Finalizer-gated teardown of a propagation's targets.

use propagator_core::propagation::FINALIZER;
use propagator_core::{ConfigMapPropagation, DeletionPolicy, TargetKey};

use super::actual::discover_current;
use super::error::ReconcileError;
use super::mutate::TargetOperation;
use super::reconciler::Reconciler;
use super::status;

impl Reconciler {
    /// Deletes or orphans every owned target, then releases the finalizer.
    ///
    /// The finalizer stays in place when any target fails, so the store keeps
    /// the propagation around for the next attempt.
    pub async fn finalize(&self, propagation: &ConfigMapPropagation) -> Result<(), ReconcileError> {
        if !propagation.metadata.has_finalizer(FINALIZER) {
            return Ok(());
        }

        let store = self.store.as_ref();
        let current = discover_current(store, propagation).await?;
        let operation = match propagation.spec.deletion_policy {
            DeletionPolicy::Delete => TargetOperation::Delete,
            DeletionPolicy::Orphan => TargetOperation::Orphan,
        };
        let total = current.len();
        let jobs = current.into_iter().map(|k| (k, operation)).collect();
        let results = self.run_jobs(propagation, jobs).await;

        let failed: Vec<TargetKey> = results
            .iter()
            .filter(|r| r.failed())
            .map(|r| r.key.clone())
            .collect();
        if !failed.is_empty() {
            let err = ReconcileError::PartialDeletionFailure { targets: failed };
            self.recorder
                .warning(propagation, err.reason(), err.to_string());
            let new_status = status::deletion_failed_status(propagation, total, &results, self.now());
            if let Err(e) = status::persist(store, propagation, &new_status).await {
                tracing::warn!(error = %e, "failed to record deletion failure in status");
            }
            return Err(err);
        }

        let mut released = propagation.clone();
        released.metadata.remove_finalizer(FINALIZER);
        match store.update_propagation(&released).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(targets = total, policy = ?propagation.spec.deletion_policy, "finalizer released");
        Ok(())
    }
}
