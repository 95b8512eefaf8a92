//! Reverse index from ConfigMap/Secret to the workloads that depend on it.
//!
//! Shared by every reconcile worker and by the watch mappers, which run
//! synchronously inside the controller streams, hence a blocking lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::references::ReferenceSet;
use crate::source::{SourceKey, SourceKind};
use crate::workload::WorkloadId;

/// (namespace, name) of a source within one kind's bucket map.
type SourceId = (String, String);

#[derive(Default)]
struct Buckets {
    config_maps: HashMap<SourceId, BTreeSet<WorkloadId>>,
    secrets: HashMap<SourceId, BTreeSet<WorkloadId>>,
}

impl Buckets {
    fn by_kind(&self, kind: SourceKind) -> &HashMap<SourceId, BTreeSet<WorkloadId>> {
        match kind {
            SourceKind::ConfigMap => &self.config_maps,
            SourceKind::Secret => &self.secrets,
        }
    }

    fn by_kind_mut(
        &mut self,
        kind: SourceKind,
    ) -> &mut HashMap<SourceId, BTreeSet<WorkloadId>> {
        match kind {
            SourceKind::ConfigMap => &mut self.config_maps,
            SourceKind::Secret => &mut self.secrets,
        }
    }

    fn remove_everywhere(&mut self, id: &WorkloadId) {
        for map in [&mut self.config_maps, &mut self.secrets] {
            map.retain(|_, watchers| {
                watchers.remove(id);
                !watchers.is_empty()
            });
        }
    }
}

#[derive(Clone, Default)]
pub struct WatchIndex {
    inner: Arc<RwLock<Buckets>>,
}

impl WatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything `id` watches with exactly the sources in `refs`.
    /// Always a full clear and rebuild under one write lock.
    pub fn resync(&self, id: &WorkloadId, refs: &ReferenceSet) {
        let mut buckets = self.inner.write();
        buckets.remove_everywhere(id);
        for (kind, reference) in refs.iter() {
            buckets
                .by_kind_mut(kind)
                .entry((id.namespace.clone(), reference.name.clone()))
                .or_default()
                .insert(id.clone());
        }
        trace!(workload = %id, sources = refs.len(), "watch index resynced");
    }

    pub fn unwatch(&self, id: &WorkloadId) {
        self.inner.write().remove_everywhere(id);
        trace!(workload = %id, "watch index cleared");
    }

    pub fn lookup(&self, source: &SourceKey) -> BTreeSet<WorkloadId> {
        self.inner
            .read()
            .by_kind(source.kind)
            .get(&(source.namespace.clone(), source.name.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of sources with at least one watcher.
    pub fn len(&self) -> usize {
        let buckets = self.inner.read();
        buckets.config_maps.len() + buckets.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every source `id` currently occupies a bucket for.
    pub fn watched_by(&self, id: &WorkloadId) -> BTreeSet<SourceKey> {
        let buckets = self.inner.read();
        let mut out = BTreeSet::new();
        for kind in [SourceKind::ConfigMap, SourceKind::Secret] {
            for ((ns, name), watchers) in buckets.by_kind(kind) {
                if watchers.contains(id) {
                    out.insert(SourceKey::new(kind, ns, name));
                }
            }
        }
        out
    }
}
