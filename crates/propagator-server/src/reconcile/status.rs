//! Status aggregation and persistence.
//!
//! A new status is built from the pass results, compared with the persisted
//! one, and written as an RFC 7386 merge patch only when they differ.

use propagator_core::propagation::CONDITION_READY;
use propagator_core::{
    Condition, ConditionStatus, ConfigMapPropagation, PropagationStatus, TargetKey, TargetState,
    TargetStatus, TargetsSummary, Timestamp,
};
use propagator_storage::{ObjectStore, StorageError};
use serde_json::{Map, Value};

use super::error::{ReconcileError, TargetError, join_keys};
use super::mutate::{TargetOperation, TargetOutcome};

/// Result of one target mutation within a pass.
#[derive(Debug)]
pub struct TargetResult {
    pub key: TargetKey,
    pub operation: TargetOperation,
    pub outcome: Result<TargetOutcome, TargetError>,
}

impl TargetResult {
    pub fn failed(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Counts every write and failure; `total` is supplied by the caller.
pub fn summarize(total: usize, results: &[TargetResult]) -> (TargetsSummary, Vec<TargetStatus>) {
    let mut summary = TargetsSummary {
        total: total as u32,
        ..Default::default()
    };
    let mut failures = Vec::new();

    for result in results {
        match &result.outcome {
            Ok(TargetOutcome::Created) => summary.created += 1,
            Ok(TargetOutcome::Adopted { changed: true }) | Ok(TargetOutcome::Updated) => {
                summary.updated += 1
            }
            Ok(TargetOutcome::Deleted) => summary.deleted += 1,
            Ok(TargetOutcome::Orphaned) => summary.orphaned += 1,
            Ok(_) => {}
            Err(err) => {
                summary.failed += 1;
                failures.push(TargetStatus {
                    namespace: result.key.namespace.clone(),
                    name: result.key.name.clone(),
                    state: TargetState::Failed,
                    reason: err.reason().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    failures.sort_by(|a, b| a.key().cmp(&b.key()));
    (summary, failures)
}

/// Status after a completed sync pass. `source_version` is the
/// `resourceVersion` of the source ConfigMap the pass propagated.
pub fn synced_status(
    propagation: &ConfigMapPropagation,
    source_version: Option<&str>,
    total: usize,
    results: &[TargetResult],
    now: Timestamp,
) -> PropagationStatus {
    let (summary, failures) = summarize(total, results);
    let mut status = propagation.status.clone();
    status.observed_generation = Some(propagation.metadata.generation);
    status.last_synced_at = Some(now);

    let condition = if failures.is_empty() {
        status.synced_generation = Some(propagation.metadata.generation);
        status.synced_resource_version = source_version.map(str::to_string);
        status.last_successful_sync = Some(now);
        ready(now)
    } else {
        let keys: Vec<TargetKey> = failures.iter().map(TargetStatus::key).collect();
        not_ready("SyncFailed", format!("Sync failed for: {}", join_keys(&keys)), now)
    };
    set_condition(&mut status.conditions, condition);
    status.targets_summary = Some(summary);
    status.target_statuses = failures;
    status
}

/// Status after a pass that stopped before touching any target.
pub fn aborted_status(
    propagation: &ConfigMapPropagation,
    error: &ReconcileError,
    now: Timestamp,
) -> PropagationStatus {
    let mut status = propagation.status.clone();
    status.observed_generation = Some(propagation.metadata.generation);
    set_condition(
        &mut status.conditions,
        not_ready(error.reason(), error.to_string(), now),
    );
    status
}

/// Status after a deletion pass that left some targets behind.
pub fn deletion_failed_status(
    propagation: &ConfigMapPropagation,
    total: usize,
    results: &[TargetResult],
    now: Timestamp,
) -> PropagationStatus {
    let (summary, failures) = summarize(total, results);
    let keys: Vec<TargetKey> = failures.iter().map(TargetStatus::key).collect();
    let mut status = propagation.status.clone();
    set_condition(
        &mut status.conditions,
        not_ready(
            "DeletionFailed",
            format!("Failed to remove or orphan: {}", join_keys(&keys)),
            now,
        ),
    );
    status.targets_summary = Some(summary);
    status.target_statuses = failures;
    status
}

fn ready(now: Timestamp) -> Condition {
    Condition {
        type_: CONDITION_READY.to_string(),
        status: ConditionStatus::True,
        reason: "Synced".to_string(),
        message: "All targets have been synced".to_string(),
        last_transition_time: now,
    }
}

fn not_ready(reason: &str, message: String, now: Timestamp) -> Condition {
    Condition {
        type_: CONDITION_READY.to_string(),
        status: ConditionStatus::False,
        reason: reason.to_string(),
        message,
        last_transition_time: now,
    }
}

/// Inserts or replaces the condition of the same type. The transition time
/// only moves when the status value flips.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.status = condition.status;
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
        }
        None => conditions.push(condition),
    }
}

/// RFC 7386 patch that turns `old` into `new`.
pub fn merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new_value) if new_value != old_value => {
                        patch.insert(key.clone(), merge_patch(old_value, new_value));
                    }
                    Some(_) => {}
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// Writes `status` when it differs from the persisted one. Returns whether a
/// write happened.
pub async fn persist(
    store: &dyn ObjectStore,
    propagation: &ConfigMapPropagation,
    status: &PropagationStatus,
) -> Result<bool, StorageError> {
    if &propagation.status == status {
        return Ok(false);
    }
    let old = serde_json::to_value(&propagation.status)?;
    let new = serde_json::to_value(status)?;
    let patch = merge_patch(&old, &new);
    store
        .patch_propagation_status(
            &propagation.metadata.namespace,
            &propagation.metadata.name,
            &patch,
        )
        .await?;
    Ok(true)
}
