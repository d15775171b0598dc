//! Resync decision.
//!
//! A pure function of the propagation's spec, generation and persisted
//! status. Nothing is kept in memory between passes, so a restarted
//! controller reaches the same decision.

use std::time::Duration;

use propagator_core::{ConfigMapPropagation, PropagationStatus, SyncMode, Timestamp};

/// When the controller should look at a propagation again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Immediately,
    After(Duration),
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resync {
    Due,
    NotDue(Wake),
}

pub fn evaluate(propagation: &ConfigMapPropagation, now: Timestamp) -> Resync {
    let spec = &propagation.spec;
    let status = &propagation.status;
    let generation_changed = status.synced_generation != Some(propagation.metadata.generation);

    match spec.sync_mode {
        SyncMode::CreatedOnce => {
            if status.synced_generation.is_none() || status.last_successful_sync.is_none() {
                Resync::Due
            } else {
                Resync::NotDue(Wake::Never)
            }
        }
        SyncMode::OnChange => {
            if generation_changed {
                Resync::Due
            } else {
                Resync::NotDue(remaining(status, spec.sync_interval, now))
            }
        }
        SyncMode::Periodic => {
            if generation_changed || interval_elapsed(status, spec.sync_interval, now) {
                Resync::Due
            } else {
                Resync::NotDue(remaining(status, spec.sync_interval, now))
            }
        }
        SyncMode::Unknown => Resync::NotDue(Wake::Never),
    }
}

fn interval_elapsed(status: &PropagationStatus, interval: Duration, now: Timestamp) -> bool {
    if interval.is_zero() {
        return false;
    }
    match status.last_synced_at {
        None => true,
        Some(last) => last.elapsed_until(now).is_some_and(|elapsed| elapsed >= interval),
    }
}

/// Wait until the next interval boundary after `lastSyncedAt`.
///
/// Once a whole interval has already passed, the wait rounds up to the next
/// boundary instead of flooring at zero, so a propagation that is not due
/// never spins on an immediate wake.
fn remaining(status: &PropagationStatus, interval: Duration, now: Timestamp) -> Wake {
    if interval.is_zero() {
        return Wake::Never;
    }
    let Some(last) = status.last_synced_at else {
        return Wake::After(interval);
    };
    match last.elapsed_until(now) {
        // lastSyncedAt lies in the future: clock skew.
        None => Wake::Immediately,
        Some(elapsed) if elapsed < interval => Wake::After(interval - elapsed),
        Some(elapsed) => {
            let into_period = elapsed.as_nanos() % interval.as_nanos();
            Wake::After(interval - Duration::from_nanos(into_period as u64))
        }
    }
}
