use crate::faults::{FaultInjector, StoreOp};
use papaya::HashMap as PapayaHashMap;
use propagator_core::resource::Resource;
use propagator_core::{ConfigMap, ConfigMapPropagation, Namespace, Selector, now_utc};
use propagator_storage::StorageError;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub type StoreKey = String; // Format: "namespace/name", or "name" when cluster-scoped

pub(crate) fn make_key(namespace: &str, name: &str) -> StoreKey {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// In-memory object store.
///
/// Reads go straight to the papaya maps. Writes are serialized by a single
/// mutex so that precondition checks and the write itself are atomic.
#[derive(Debug)]
pub struct InMemoryStore {
    pub(crate) namespaces: PapayaHashMap<StoreKey, Namespace>,
    pub(crate) config_maps: PapayaHashMap<StoreKey, ConfigMap>,
    pub(crate) propagations: PapayaHashMap<StoreKey, ConfigMapPropagation>,
    version_counter: AtomicU64,
    pub(crate) write_lock: Mutex<()>,
    faults: FaultInjector,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: PapayaHashMap::new(),
            config_maps: PapayaHashMap::new(),
            propagations: PapayaHashMap::new(),
            version_counter: AtomicU64::new(1),
            write_lock: Mutex::new(()),
            faults: FaultInjector::new(),
        }
    }

    /// Failure rules consulted before every operation.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub(crate) fn next_version(&self) -> String {
        self.version_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    pub(crate) fn check_fault(
        &self,
        op: StoreOp,
        kind: &str,
        key: Option<&str>,
    ) -> Result<(), StorageError> {
        self.faults.check(op, kind, key)
    }

    pub(crate) fn read<R: Resource>(
        &self,
        map: &PapayaHashMap<StoreKey, R>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<R>, StorageError> {
        let key = make_key(namespace, name);
        self.check_fault(StoreOp::Get, R::KIND, Some(&key))?;
        Ok(map.pin().get(&key).cloned())
    }

    pub(crate) fn list<R: Resource>(
        &self,
        map: &PapayaHashMap<StoreKey, R>,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<R>, StorageError> {
        self.check_fault(StoreOp::List, R::KIND, namespace)?;
        let guard = map.pin();
        let mut items: Vec<(StoreKey, R)> = guard
            .iter()
            .filter(|(_, obj)| namespace.is_none_or(|ns| obj.meta().namespace == ns))
            .filter(|(_, obj)| selector.matches(&obj.meta().labels))
            .map(|(key, obj)| (key.clone(), obj.clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items.into_iter().map(|(_, obj)| obj).collect())
    }

    /// Inserts a new object. `prepare` runs on the stamped copy before it is
    /// stored.
    pub(crate) async fn insert_new<R: Resource>(
        &self,
        map: &PapayaHashMap<StoreKey, R>,
        object: &R,
        prepare: impl FnOnce(&mut R),
    ) -> Result<R, StorageError> {
        let meta = object.meta();
        validate_identity::<R>(&meta.namespace, &meta.name)?;
        let key = make_key(&meta.namespace, &meta.name);
        self.check_fault(StoreOp::Create, R::KIND, Some(&key))?;

        let _write = self.write_lock.lock().await;
        if R::NAMESPACED && self.namespaces.pin().get(&meta.namespace).is_none() {
            return Err(StorageError::not_found(Namespace::KIND, &meta.namespace));
        }
        let guard = map.pin();
        if guard.get(&key).is_some() {
            return Err(StorageError::already_exists(R::KIND, key));
        }

        let mut stored = object.clone();
        {
            let meta = stored.meta_mut();
            meta.uid = uuid::Uuid::new_v4().to_string();
            meta.resource_version = self.next_version();
            meta.creation_timestamp = Some(now_utc());
            meta.deletion_timestamp = None;
        }
        prepare(&mut stored);
        guard.insert(key, stored.clone());
        Ok(stored)
    }

    /// Replaces an existing object, honouring a non-empty `resourceVersion`
    /// as a precondition. `merge` receives the current object and the
    /// incoming copy (identity fields already restored) and may adjust the
    /// latter.
    pub(crate) async fn replace<R: Resource>(
        &self,
        map: &PapayaHashMap<StoreKey, R>,
        object: &R,
        merge: impl FnOnce(&R, &mut R),
    ) -> Result<R, StorageError> {
        let meta = object.meta();
        validate_identity::<R>(&meta.namespace, &meta.name)?;
        let key = make_key(&meta.namespace, &meta.name);
        self.check_fault(StoreOp::Update, R::KIND, Some(&key))?;

        let _write = self.write_lock.lock().await;
        let guard = map.pin();
        let current = guard
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(R::KIND, &key))?;
        check_precondition(&key, &current, meta.resource_version.as_str())?;

        let mut next = object.clone();
        {
            let current_meta = current.meta();
            let meta = next.meta_mut();
            meta.uid = current_meta.uid.clone();
            meta.creation_timestamp = current_meta.creation_timestamp;
            meta.deletion_timestamp = current_meta.deletion_timestamp;
            meta.generation = current_meta.generation;
            meta.resource_version = self.next_version();
        }
        merge(&current, &mut next);

        let finalized = next.meta().is_deleting() && next.meta().finalizers.is_empty();
        if finalized {
            guard.remove(&key);
        } else {
            guard.insert(key, next.clone());
        }
        Ok(next)
    }

    /// Removes an object outright, guarded by an optional resource version.
    pub(crate) async fn remove<R: Resource>(
        &self,
        map: &PapayaHashMap<StoreKey, R>,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<R, StorageError> {
        let key = make_key(namespace, name);
        self.check_fault(StoreOp::Delete, R::KIND, Some(&key))?;

        let _write = self.write_lock.lock().await;
        let guard = map.pin();
        let current = guard
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(R::KIND, &key))?;
        check_precondition(&key, &current, resource_version.unwrap_or_default())?;
        guard.remove(&key);
        Ok(current)
    }

    /// Deletes a propagation: stamps `deletionTimestamp` while finalizers
    /// remain, removes it otherwise.
    pub(crate) async fn delete_finalizable(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMapPropagation, StorageError> {
        let key = make_key(namespace, name);
        self.check_fault(StoreOp::Delete, ConfigMapPropagation::KIND, Some(&key))?;

        let _write = self.write_lock.lock().await;
        self.mark_or_remove_propagation(&key)
    }

    /// Caller holds the write lock.
    pub(crate) fn mark_or_remove_propagation(
        &self,
        key: &str,
    ) -> Result<ConfigMapPropagation, StorageError> {
        let guard = self.propagations.pin();
        let mut current = guard
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(ConfigMapPropagation::KIND, key))?;

        if current.metadata.finalizers.is_empty() {
            guard.remove(key);
            current
                .metadata
                .deletion_timestamp
                .get_or_insert_with(now_utc);
            return Ok(current);
        }
        if current.metadata.deletion_timestamp.is_none() {
            current.metadata.deletion_timestamp = Some(now_utc());
            current.metadata.resource_version = self.next_version();
            guard.insert(key.to_string(), current.clone());
        }
        Ok(current)
    }
}

fn validate_identity<R: Resource>(namespace: &str, name: &str) -> Result<(), StorageError> {
    if name.is_empty() {
        return Err(StorageError::invalid_object(format!(
            "{}: metadata.name is required",
            R::KIND
        )));
    }
    if R::NAMESPACED && namespace.is_empty() {
        return Err(StorageError::invalid_object(format!(
            "{} {name}: metadata.namespace is required",
            R::KIND
        )));
    }
    if !R::NAMESPACED && !namespace.is_empty() {
        return Err(StorageError::invalid_object(format!(
            "{} {name} is cluster-scoped",
            R::KIND
        )));
    }
    Ok(())
}

fn check_precondition<R: Resource>(
    key: &str,
    current: &R,
    expected: &str,
) -> Result<(), StorageError> {
    let actual = &current.meta().resource_version;
    if !expected.is_empty() && expected != actual {
        return Err(StorageError::version_conflict(key, expected, actual));
    }
    Ok(())
}
