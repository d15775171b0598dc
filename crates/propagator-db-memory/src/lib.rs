//! In-memory object store for the ConfigMap propagator.
//!
//! This crate provides an implementation of the `ObjectStore` trait from
//! `propagator-storage`, using papaya lock-free HashMaps for reads. It backs
//! the server binary and doubles as the store in engine tests, with
//! [`FaultInjector`] rules to simulate backend failures.
//!
//! # Example
//!
//! ```ignore
//! use propagator_db_memory::InMemoryStore;
//! use propagator_storage::ObjectStore;
//!
//! let store = InMemoryStore::new();
//! store.create_namespace(&Namespace::new("team-a")).await?;
//! store.create_config_map(&ConfigMap::new("team-a", "app")).await?;
//! ```

pub mod faults;
mod store_impl;
pub mod store;

pub use faults::{FaultInjector, StoreOp};
pub use propagator_storage::{ObjectStore, StorageError};
pub use store::InMemoryStore;

pub type DynObjectStore = std::sync::Arc<dyn ObjectStore>;

pub fn create_object_store() -> DynObjectStore {
    std::sync::Arc::new(InMemoryStore::new())
}
