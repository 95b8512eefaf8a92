//! Discovery of the ConfigMaps and Secrets a pod template depends on.
//!
//! Classification is a pure function of the pod template (plus the
//! extra-dependency annotations of the workload). A malformed or partial
//! template yields a partial reference set, never an error.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};
use tracing::warn;

use crate::annotations::{EXTRA_CONFIGMAPS, EXTRA_SECRETS};
use crate::source::SourceKind;

/// How much of a source a workload depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefMode {
    /// Every field of the source.
    Whole,
    /// Only the named fields; the value is the per-field optional flag.
    Fields(BTreeMap<String, bool>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReference {
    pub name: String,
    /// True only when every reference folded into this one is optional.
    pub optional: bool,
    pub mode: RefMode,
}

impl ConfigReference {
    pub fn whole(name: &str, optional: bool) -> Self {
        Self {
            name: name.to_string(),
            optional,
            mode: RefMode::Whole,
        }
    }

    pub fn fields<'a>(
        name: &str,
        fields: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Self {
        let fields: BTreeMap<String, bool> =
            fields.into_iter().map(|(k, o)| (k.to_string(), o)).collect();
        let optional = fields.values().all(|o| *o);
        Self {
            name: name.to_string(),
            optional,
            mode: RefMode::Fields(fields),
        }
    }

    pub fn is_whole(&self) -> bool {
        matches!(self.mode, RefMode::Whole)
    }

    /// Names of the fields whose absence must fail the fetch. Empty for a
    /// whole-object reference (the source itself is what is required).
    pub fn required_fields(&self) -> Vec<&str> {
        match &self.mode {
            RefMode::Whole => Vec::new(),
            RefMode::Fields(f) => f
                .iter()
                .filter(|(_, optional)| !**optional)
                .map(|(k, _)| k.as_str())
                .collect(),
        }
    }

    fn merge_whole(&mut self, optional: bool) {
        self.optional = self.optional && optional;
        self.mode = RefMode::Whole;
    }

    fn merge_field(&mut self, key: &str, optional: bool) {
        self.optional = self.optional && optional;
        if let RefMode::Fields(fields) = &mut self.mode {
            fields
                .entry(key.to_string())
                .and_modify(|o| *o = *o && optional)
                .or_insert(optional);
        }
    }
}

/// All references of one workload, split by source kind and keyed by source
/// name. At most one reference per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    pub config_maps: BTreeMap<String, ConfigReference>,
    pub secrets: BTreeMap<String, ConfigReference>,
}

impl ReferenceSet {
    pub fn get(&self, kind: SourceKind) -> &BTreeMap<String, ConfigReference> {
        match kind {
            SourceKind::ConfigMap => &self.config_maps,
            SourceKind::Secret => &self.secrets,
        }
    }

    fn get_mut(
        &mut self,
        kind: SourceKind,
    ) -> &mut BTreeMap<String, ConfigReference> {
        match kind {
            SourceKind::ConfigMap => &mut self.config_maps,
            SourceKind::Secret => &mut self.secrets,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.config_maps.is_empty() && self.secrets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.config_maps.len() + self.secrets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceKind, &ConfigReference)> {
        self.config_maps
            .values()
            .map(|r| (SourceKind::ConfigMap, r))
            .chain(self.secrets.values().map(|r| (SourceKind::Secret, r)))
    }

    pub fn add_whole(&mut self, kind: SourceKind, name: &str, optional: bool) {
        if name.is_empty() {
            return;
        }
        self.get_mut(kind)
            .entry(name.to_string())
            .and_modify(|r| r.merge_whole(optional))
            .or_insert_with(|| ConfigReference::whole(name, optional));
    }

    pub fn add_field(
        &mut self,
        kind: SourceKind,
        name: &str,
        key: &str,
        optional: bool,
    ) {
        if name.is_empty() || key.is_empty() {
            return;
        }
        self.get_mut(kind)
            .entry(name.to_string())
            .and_modify(|r| r.merge_field(key, optional))
            .or_insert_with(|| ConfigReference::fields(name, [(key, optional)]));
    }
}

/// Collect every ConfigMap/Secret the template references.
pub fn classify(template: &PodTemplateSpec) -> ReferenceSet {
    let mut refs = ReferenceSet::default();
    let Some(spec) = template.spec.as_ref() else {
        return refs;
    };

    for volume in spec.volumes.iter().flatten() {
        if let Some(cm) = volume.config_map.as_ref() {
            refs.add_whole(
                SourceKind::ConfigMap,
                &cm.name,
                cm.optional.unwrap_or(false),
            );
        }
        if let Some(secret) = volume.secret.as_ref() {
            if let Some(name) = secret.secret_name.as_deref() {
                refs.add_whole(
                    SourceKind::Secret,
                    name,
                    secret.optional.unwrap_or(false),
                );
            }
        }
        let projections = volume
            .projected
            .as_ref()
            .and_then(|p| p.sources.as_ref());
        for projection in projections.into_iter().flatten() {
            if let Some(cm) = projection.config_map.as_ref() {
                refs.add_whole(
                    SourceKind::ConfigMap,
                    &cm.name,
                    cm.optional.unwrap_or(false),
                );
            }
            if let Some(secret) = projection.secret.as_ref() {
                refs.add_whole(
                    SourceKind::Secret,
                    &secret.name,
                    secret.optional.unwrap_or(false),
                );
            }
        }
    }

    let containers = spec
        .init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter());
    for container in containers {
        classify_container(container, &mut refs);
    }
    refs
}

fn classify_container(container: &Container, refs: &mut ReferenceSet) {
    for env_from in container.env_from.iter().flatten() {
        if let Some(cm) = env_from.config_map_ref.as_ref() {
            refs.add_whole(
                SourceKind::ConfigMap,
                &cm.name,
                cm.optional.unwrap_or(false),
            );
        }
        if let Some(secret) = env_from.secret_ref.as_ref() {
            refs.add_whole(
                SourceKind::Secret,
                &secret.name,
                secret.optional.unwrap_or(false),
            );
        }
    }

    for env in container.env.iter().flatten() {
        let Some(value_from) = env.value_from.as_ref() else {
            continue;
        };
        if let Some(sel) = value_from.config_map_key_ref.as_ref() {
            refs.add_field(
                SourceKind::ConfigMap,
                &sel.name,
                &sel.key,
                sel.optional.unwrap_or(false),
            );
        }
        if let Some(sel) = value_from.secret_key_ref.as_ref() {
            refs.add_field(
                SourceKind::Secret,
                &sel.name,
                &sel.key,
                sel.optional.unwrap_or(false),
            );
        }
    }
}

/// Fold the extra-dependency annotations into `refs` as required
/// whole-object references. Entries are `name` or `namespace/name`; only
/// the workload's own namespace is accepted.
pub fn add_extra_references(
    refs: &mut ReferenceSet,
    annotations: &BTreeMap<String, String>,
    namespace: &str,
) {
    for (key, kind) in [
        (EXTRA_CONFIGMAPS, SourceKind::ConfigMap),
        (EXTRA_SECRETS, SourceKind::Secret),
    ] {
        let Some(value) = annotations.get(key) else {
            continue;
        };
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty())
        {
            let name = match entry.split_once('/') {
                None => entry,
                Some((ns, name)) if ns == namespace => name,
                Some((ns, _)) => {
                    warn!(%kind, %entry, %ns, %namespace, "extra reference outside workload namespace; skipped");
                    continue;
                }
            };
            refs.add_whole(kind, name, false);
        }
    }
}
