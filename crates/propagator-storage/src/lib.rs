//! # propagator-storage
//!
//! Object store abstraction for the ConfigMap propagator.
//!
//! This crate defines the [`ObjectStore`] contract the reconciler is written
//! against. Backends live in separate crates.
//!
//! The store follows the usual API-server rules:
//! - every write assigns a fresh `resourceVersion`
//! - updates carrying a non-empty `resourceVersion` are rejected with
//!   [`StorageError::VersionConflict`] when it is stale
//! - deleting an object with finalizers only stamps `deletionTimestamp`;
//!   the object disappears once its last finalizer is removed
//!
//! ```ignore
//! use propagator_storage::{ObjectStore, StorageError};
//!
//! async fn payload_of(store: &dyn ObjectStore) -> Result<Option<Payload>, StorageError> {
//!     let cm = store.get_config_map("default", "app-config").await?;
//!     Ok(cm.map(|cm| cm.payload))
//! }
//! ```

mod error;
pub mod evented;
mod traits;

pub use error::{ErrorCategory, StorageError};
pub use evented::EventedStore;
pub use traits::ObjectStore;

pub type StorageResult<T> = Result<T, StorageError>;

pub type DynStore = std::sync::Arc<dyn ObjectStore>;

pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::evented::EventedStore;
    pub use crate::traits::ObjectStore;
    pub use crate::{DynStore, StorageResult};
}
