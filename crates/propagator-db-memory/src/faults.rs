//! Failure injection for exercising error paths against the in-memory store.

use propagator_storage::StorageError;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    Delete,
    PatchStatus,
}

#[derive(Debug, Clone)]
struct FaultRule {
    op: StoreOp,
    kind: String,
    /// `namespace/name` for single-object operations, the namespace for
    /// lists. `None` matches any.
    key: Option<String>,
    error: StorageError,
    remaining: Option<usize>,
}

impl FaultRule {
    fn matches(&self, op: StoreOp, kind: &str, key: Option<&str>) -> bool {
        self.op == op
            && self.kind == kind
            && match (&self.key, key) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
            }
    }
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    rules: Mutex<Vec<FaultRule>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every matching call until [`FaultInjector::clear`].
    pub fn fail(&self, op: StoreOp, kind: &str, key: Option<&str>, error: StorageError) {
        self.push(op, kind, key, error, None);
    }

    /// Fail the next `times` matching calls.
    pub fn fail_times(
        &self,
        op: StoreOp,
        kind: &str,
        key: Option<&str>,
        error: StorageError,
        times: usize,
    ) {
        self.push(op, kind, key, error, Some(times));
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn check(
        &self,
        op: StoreOp,
        kind: &str,
        key: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut rules = self.lock();
        let Some(index) = rules.iter().position(|r| r.matches(op, kind, key)) else {
            return Ok(());
        };
        let error = rules[index].error.clone();
        if let Some(remaining) = rules[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(index);
            }
        }
        tracing::debug!(?op, kind, key, error = %error, "Injected store failure");
        Err(error)
    }

    fn push(
        &self,
        op: StoreOp,
        kind: &str,
        key: Option<&str>,
        error: StorageError,
        remaining: Option<usize>,
    ) {
        if remaining == Some(0) {
            return;
        }
        self.lock().push(FaultRule {
            op,
            kind: kind.to_string(),
            key: key.map(str::to_string),
            error,
            remaining,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FaultRule>> {
        self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_rule() {
        let faults = FaultInjector::new();
        faults.fail(
            StoreOp::Create,
            "ConfigMap",
            Some("team-b/app"),
            StorageError::internal("disk full"),
        );
        assert!(faults.check(StoreOp::Create, "ConfigMap", Some("team-b/app")).is_err());
        assert!(faults.check(StoreOp::Create, "ConfigMap", Some("team-b/app")).is_err());
        assert!(faults.check(StoreOp::Create, "ConfigMap", Some("team-a/app")).is_ok());
        assert!(faults.check(StoreOp::Update, "ConfigMap", Some("team-b/app")).is_ok());

        faults.clear();
        assert!(faults.check(StoreOp::Create, "ConfigMap", Some("team-b/app")).is_ok());
    }

    #[test]
    fn test_counted_rule() {
        let faults = FaultInjector::new();
        faults.fail_times(
            StoreOp::List,
            "Namespace",
            None,
            StorageError::internal("timeout"),
            2,
        );
        assert!(faults.check(StoreOp::List, "Namespace", None).is_err());
        assert!(faults.check(StoreOp::List, "Namespace", Some("x")).is_err());
        assert!(faults.check(StoreOp::List, "Namespace", None).is_ok());
    }
}
