use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, trace};

use super::{ClusterClient, StoreError};
use crate::source::{ConfigSource, SourceKey, SourceKind};
use crate::workload::Workload;

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn into_store_err(e: kube::Error) -> StoreError {
    match &e {
        kube::Error::Api(ae) if ae.code == 409 => {
            StoreError::Conflict(ae.message.clone())
        }
        _ => StoreError::Transport(e.to_string()),
    }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn get_source(
        &self,
        key: &SourceKey,
    ) -> Result<Option<ConfigSource>, StoreError> {
        trace!(source = %key, "get source");
        let found = match key.kind {
            SourceKind::ConfigMap => {
                let api: Api<ConfigMap> =
                    Api::namespaced(self.client.clone(), &key.namespace);
                api.get_opt(&key.name)
                    .await
                    .map_err(into_store_err)?
                    .map(ConfigSource::from)
            }
            SourceKind::Secret => {
                let api: Api<Secret> =
                    Api::namespaced(self.client.clone(), &key.namespace);
                api.get_opt(&key.name)
                    .await
                    .map_err(into_store_err)?
                    .map(ConfigSource::from)
            }
        };
        Ok(found)
    }

    async fn list_sources(
        &self,
        namespace: &str,
        kind: SourceKind,
    ) -> Result<Vec<ConfigSource>, StoreError> {
        let lp = ListParams::default();
        let items = match kind {
            SourceKind::ConfigMap => {
                let api: Api<ConfigMap> =
                    Api::namespaced(self.client.clone(), namespace);
                api.list(&lp)
                    .await
                    .map_err(into_store_err)?
                    .items
                    .into_iter()
                    .map(ConfigSource::from)
                    .collect()
            }
            SourceKind::Secret => {
                let api: Api<Secret> =
                    Api::namespaced(self.client.clone(), namespace);
                api.list(&lp)
                    .await
                    .map_err(into_store_err)?
                    .items
                    .into_iter()
                    .map(ConfigSource::from)
                    .collect()
            }
        };
        Ok(items)
    }

    async fn update_source_owners(
        &self,
        source: &ConfigSource,
    ) -> Result<(), StoreError> {
        let ns = source.namespace();
        let name = source.name();
        let owners =
            source.metadata.owner_references.clone().unwrap_or_default();
        // resourceVersion in a merge patch makes the API server reject the
        // write if the object moved on since it was listed.
        let patch = json!({
            "metadata": {
                "ownerReferences": owners,
                "resourceVersion": source.metadata.resource_version,
            }
        });
        let pp = PatchParams::default();
        debug!(%ns, %name, kind = ?source.kind, "patch owner references");
        match source.kind {
            Some(SourceKind::ConfigMap) => {
                let api: Api<ConfigMap> =
                    Api::namespaced(self.client.clone(), &ns);
                api.patch(&name, &pp, &Patch::Merge(&patch))
                    .await
                    .map_err(into_store_err)?;
            }
            Some(SourceKind::Secret) => {
                let api: Api<Secret> =
                    Api::namespaced(self.client.clone(), &ns);
                api.patch(&name, &pp, &Patch::Merge(&patch))
                    .await
                    .map_err(into_store_err)?;
            }
            None => {
                return Err(StoreError::Transport(format!(
                    "source {ns}/{name} has no kind"
                )));
            }
        }
        Ok(())
    }

    async fn replace_workload<K: Workload>(
        &self,
        obj: &K,
    ) -> Result<K, StoreError> {
        let ns = obj.namespace().unwrap_or_else(|| "default".into());
        let name = obj.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        api.replace(&name, &PostParams::default(), obj)
            .await
            .map_err(into_store_err)
    }
}
