#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use propagator_core::events::EventBroadcaster;
use propagator_core::{
    ConfigMap, ConfigMapPropagation, Namespace, PropagationSource, PropagationSpec, Timestamp,
};
use propagator_db_memory::InMemoryStore;
use propagator_server::{Reconciler, ReconcilerSettings, Recorder};
use propagator_storage::{DynStore, EventedStore, ObjectStore};

pub const T0: i64 = 1_700_000_000;

/// Reconciler over an evented in-memory store with a settable clock.
pub struct Harness {
    pub store: Arc<EventedStore<InMemoryStore>>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub reconciler: Reconciler,
    now: Arc<AtomicI64>,
}

impl Harness {
    /// Seeds `default/app-config` (`k1=v1` plus a binary key) and one empty
    /// namespace per entry.
    pub async fn new(namespaces: &[&str]) -> Self {
        let broadcaster = EventBroadcaster::new_shared();
        let store = Arc::new(EventedStore::new(InMemoryStore::new(), broadcaster.clone()));
        store.create_namespace(&Namespace::new("default")).await.unwrap();
        for ns in namespaces {
            store.create_namespace(&Namespace::new(*ns)).await.unwrap();
        }
        let mut source = ConfigMap::new("default", "app-config").with_data([("k1", "v1")]);
        source.payload.binary_data.insert("blob".into(), vec![0, 1, 2]);
        store.create_config_map(&source).await.unwrap();

        let now = Arc::new(AtomicI64::new(T0));
        let clock_now = now.clone();
        let dyn_store: DynStore = store.clone();
        let reconciler = Reconciler::new(
            dyn_store,
            Recorder::new(broadcaster.clone()),
            ReconcilerSettings::default(),
        )
        .with_clock(Arc::new(move || {
            Timestamp::from_unix(clock_now.load(Ordering::SeqCst)).unwrap()
        }));

        Self {
            store,
            broadcaster,
            reconciler,
            now,
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn faults(&self) -> &propagator_db_memory::FaultInjector {
        self.store.inner().faults()
    }

    pub async fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let ns = Namespace::new(name).with_labels(labels.iter().copied());
        self.store.create_namespace(&ns).await.unwrap();
    }

    pub async fn create(&self, name: &str, spec: PropagationSpec) -> ConfigMapPropagation {
        self.store
            .create_propagation(&ConfigMapPropagation::new("default", name, spec))
            .await
            .unwrap()
    }

    pub async fn propagation(&self, name: &str) -> Option<ConfigMapPropagation> {
        self.store.get_propagation("default", name).await.unwrap()
    }

    pub async fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.store.get_config_map(namespace, name).await.unwrap()
    }

    pub async fn set_source_data(&self, key: &str, value: &str) {
        let mut source = self.config_map("default", "app-config").await.unwrap();
        source.payload.data.insert(key.into(), value.into());
        self.store.update_config_map(&source).await.unwrap();
    }

    /// Changes the spec and returns the stored propagation (generation bumped).
    pub async fn edit(
        &self,
        name: &str,
        change: impl FnOnce(&mut PropagationSpec),
    ) -> ConfigMapPropagation {
        let mut p = self.propagation(name).await.unwrap();
        change(&mut p.spec);
        self.store.update_propagation(&p).await.unwrap()
    }
}

/// Spec propagating `default/app-config` to the given namespaces.
pub fn spec_for(targets: &[&str]) -> PropagationSpec {
    PropagationSpec {
        source: PropagationSource::new("default", "app-config"),
        targets: targets
            .iter()
            .map(|ns| propagator_core::TargetRef::new(*ns))
            .collect(),
        ..Default::default()
    }
}
