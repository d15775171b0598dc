use propagator_core::{CoreError, TargetKey};
use propagator_storage::StorageError;
use thiserror::Error;

/// Failure of a single target mutation. Never aborts sibling targets.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("source ConfigMap {source_key} not found")]
    SourceNotFound { source_key: String },

    #[error("ConfigMap {target} was created concurrently")]
    CreateConflict { target: TargetKey },

    #[error("ConfigMap {target} was modified concurrently")]
    StoreConflict { target: TargetKey },

    #[error("store error on {target}: {error}")]
    BackingStoreError {
        target: TargetKey,
        #[source]
        error: StorageError,
    },
}

impl TargetError {
    /// Maps a store error raised while writing `target`.
    pub fn from_store(target: &TargetKey, error: StorageError) -> Self {
        match error {
            StorageError::AlreadyExists { .. } => Self::CreateConflict {
                target: target.clone(),
            },
            StorageError::VersionConflict { .. } => Self::StoreConflict {
                target: target.clone(),
            },
            error => Self::BackingStoreError {
                target: target.clone(),
                error,
            },
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "SourceNotFound",
            Self::CreateConflict { .. } => "CreateConflict",
            Self::StoreConflict { .. } => "StoreConflict",
            Self::BackingStoreError { .. } => "BackingStoreError",
        }
    }
}

/// How the controller should retry after a failed reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Wait for the next change notification.
    AwaitChange,
    /// Requeue no sooner than the missing-source floor.
    MissingSource,
    /// Requeue after the fixed deletion retry delay.
    PartialDeletion,
    /// Per-key exponential backoff.
    Backoff,
}

/// Failure of a whole reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid namespace selector: {0}")]
    InvalidSelector(#[source] CoreError),

    #[error("failed to list target namespaces: {0}")]
    ScopeList(#[source] StorageError),

    #[error("failed to list managed ConfigMaps: {0}")]
    ListTargets(#[source] StorageError),

    #[error("source ConfigMap {source_key} not found")]
    SourceNotFound { source_key: String },

    #[error("failed to remove or orphan targets: {}", join_keys(.targets))]
    PartialDeletionFailure { targets: Vec<TargetKey> },

    #[error("failed to sync {failed} target(s): {}", join_keys(.targets))]
    SyncFailed { failed: u32, targets: Vec<TargetKey> },

    #[error("store error: {0}")]
    Store(#[from] StorageError),
}

impl ReconcileError {
    /// Short code used for condition reasons, audit events and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidSelector(_) => "InvalidSelector",
            Self::ScopeList(_) => "NamespaceListFailed",
            Self::ListTargets(_) => "ListTargetsFailed",
            Self::SourceNotFound { .. } => "SourceNotFound",
            Self::PartialDeletionFailure { .. } => "DeletionFailed",
            Self::SyncFailed { .. } => "SyncFailed",
            Self::Store(_) => "StoreError",
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::InvalidSelector(_) => RetryPolicy::AwaitChange,
            Self::SourceNotFound { .. } => RetryPolicy::MissingSource,
            Self::PartialDeletionFailure { .. } => RetryPolicy::PartialDeletion,
            Self::ScopeList(_) | Self::ListTargets(_) | Self::SyncFailed { .. } | Self::Store(_) => {
                RetryPolicy::Backoff
            }
        }
    }
}

pub(crate) fn join_keys(keys: &[TargetKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
