use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use kube::core::ObjectMeta;

/// The two families of configuration object a pod template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    ConfigMap,
    Secret,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ConfigMap => "ConfigMap",
            SourceKind::Secret => "Secret",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
}

impl SourceKey {
    pub fn new(kind: SourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A fetched ConfigMap or Secret reduced to opaque field bytes. `metadata`
/// is kept for the legacy migration and never hashed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSource {
    pub kind: Option<SourceKind>,
    pub metadata: ObjectMeta,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl ConfigSource {
    pub fn name(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> String {
        self.metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".into())
    }

    pub fn key(&self) -> Option<SourceKey> {
        self.kind
            .map(|k| SourceKey::new(k, &self.namespace(), &self.name()))
    }
}

impl From<ConfigMap> for ConfigSource {
    fn from(cm: ConfigMap) -> Self {
        let mut data: BTreeMap<String, Vec<u8>> = cm
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect();
        for (k, v) in cm.binary_data.unwrap_or_default() {
            data.insert(k, v.0);
        }
        Self {
            kind: Some(SourceKind::ConfigMap),
            metadata: cm.metadata,
            data,
        }
    }
}

impl From<Secret> for ConfigSource {
    fn from(secret: Secret) -> Self {
        let data = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        Self {
            kind: Some(SourceKind::Secret),
            metadata: secret.metadata,
            data,
        }
    }
}

/// Key of the object a ConfigMap/Secret watch event refers to.
pub fn key_of<R: ResourceExt>(kind: SourceKind, obj: &R) -> SourceKey {
    SourceKey::new(
        kind,
        &obj.namespace().unwrap_or_else(|| "default".into()),
        &obj.name_any(),
    )
}
