use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use kube::core::ObjectMeta;
use parking_lot::Mutex;

use super::{ClusterClient, StoreError};
use crate::source::{ConfigSource, SourceKey, SourceKind};
use crate::workload::{Workload, WorkloadId};

/// In-process stand-in for the API server. Keeps ConfigMaps/Secrets and
/// workloads, bumps resourceVersion on every write and rejects stale writes
/// the way the API server does. Used by the test suites.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    sources: BTreeMap<SourceKey, ConfigSource>,
    workloads: BTreeMap<WorkloadId, serde_json::Value>,
    failing_gets: BTreeSet<SourceKey>,
    failing_owner_updates: BTreeSet<SourceKey>,
    get_delay: Option<Duration>,
    next_rv: u64,
    gets: usize,
    source_writes: usize,
    workload_writes: usize,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_source(&self, mut source: ConfigSource) {
        let Some(key) = source.key() else {
            return;
        };
        let mut st = self.state.lock();
        source.metadata.resource_version = Some(st.bump());
        st.sources.insert(key, source);
    }

    pub fn put_config_map(&self, ns: &str, name: &str, data: &[(&str, &str)]) {
        self.put_source(build_source(SourceKind::ConfigMap, ns, name, data));
    }

    pub fn put_secret(&self, ns: &str, name: &str, data: &[(&str, &str)]) {
        self.put_source(build_source(SourceKind::Secret, ns, name, data));
    }

    pub fn remove_source(&self, key: &SourceKey) -> Option<ConfigSource> {
        self.state.lock().sources.remove(key)
    }

    pub fn source(&self, key: &SourceKey) -> Option<ConfigSource> {
        self.state.lock().sources.get(key).cloned()
    }

    /// Make every get of `key` fail with a transport error.
    pub fn fail_gets(&self, key: SourceKey) {
        self.state.lock().failing_gets.insert(key);
    }

    /// Hold every source get for `delay` before answering.
    pub fn delay_gets(&self, delay: Duration) {
        self.state.lock().get_delay = Some(delay);
    }

    pub fn fail_owner_updates(&self, key: SourceKey) {
        self.state.lock().failing_owner_updates.insert(key);
    }

    pub fn clear_failures(&self) {
        let mut st = self.state.lock();
        st.failing_gets.clear();
        st.failing_owner_updates.clear();
        st.get_delay = None;
    }

    /// Store a workload as if created through the API, returning it with
    /// its assigned resourceVersion.
    pub fn put_workload<K: Workload>(&self, mut obj: K) -> K {
        let mut st = self.state.lock();
        obj.meta_mut().resource_version = Some(st.bump());
        let id = WorkloadId::of(&obj);
        if let Ok(v) = serde_json::to_value(&obj) {
            st.workloads.insert(id, v);
        }
        obj
    }

    pub fn workload<K: Workload>(&self, ns: &str, name: &str) -> Option<K> {
        let id = WorkloadId::new(K::KIND, ns, name);
        self.state
            .lock()
            .workloads
            .get(&id)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn gets(&self) -> usize {
        self.state.lock().gets
    }

    pub fn workload_writes(&self) -> usize {
        self.state.lock().workload_writes
    }

    pub fn source_writes(&self) -> usize {
        self.state.lock().source_writes
    }
}

fn build_source(
    kind: SourceKind,
    ns: &str,
    name: &str,
    data: &[(&str, &str)],
) -> ConfigSource {
    ConfigSource {
        kind: Some(kind),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        data: data
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect(),
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get_source(
        &self,
        key: &SourceKey,
    ) -> Result<Option<ConfigSource>, StoreError> {
        let delay = {
            let mut st = self.state.lock();
            st.gets += 1;
            st.get_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let st = self.state.lock();
        if st.failing_gets.contains(key) {
            return Err(StoreError::Transport(format!(
                "injected failure for {key}"
            )));
        }
        Ok(st.sources.get(key).cloned())
    }

    async fn list_sources(
        &self,
        namespace: &str,
        kind: SourceKind,
    ) -> Result<Vec<ConfigSource>, StoreError> {
        let st = self.state.lock();
        Ok(st
            .sources
            .iter()
            .filter(|(k, _)| k.kind == kind && k.namespace == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn update_source_owners(
        &self,
        source: &ConfigSource,
    ) -> Result<(), StoreError> {
        let Some(key) = source.key() else {
            return Err(StoreError::Transport("source has no kind".into()));
        };
        let mut st = self.state.lock();
        if st.failing_owner_updates.contains(&key) {
            return Err(StoreError::Transport(format!(
                "injected failure for {key}"
            )));
        }
        let rv = st.bump();
        let Some(stored) = st.sources.get_mut(&key) else {
            return Err(StoreError::Transport(format!("{key} not found")));
        };
        if stored.metadata.resource_version != source.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!("{key} was modified")));
        }
        stored.metadata.owner_references =
            source.metadata.owner_references.clone();
        stored.metadata.resource_version = Some(rv);
        st.source_writes += 1;
        Ok(())
    }

    async fn replace_workload<K: Workload>(
        &self,
        obj: &K,
    ) -> Result<K, StoreError> {
        let id = WorkloadId::of(obj);
        let mut st = self.state.lock();
        if let Some(stored) = st.workloads.get(&id) {
            let stored_rv = stored
                .pointer("/metadata/resourceVersion")
                .and_then(|v| v.as_str());
            let incoming_rv = obj.meta().resource_version.as_deref();
            if incoming_rv.is_some() && stored_rv != incoming_rv {
                return Err(StoreError::Conflict(format!("{id} was modified")));
            }
        }
        let mut updated = obj.clone();
        updated.meta_mut().resource_version = Some(st.bump());
        let value = serde_json::to_value(&updated)
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        st.workloads.insert(id, value);
        st.workload_writes += 1;
        Ok(updated)
    }
}
