pub mod events;
pub mod migration;
pub mod reconcile;

use std::future;
use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    Api, Client,
    runtime::{
        Controller, WatchStreamExt, controller, reflector::ObjectRef,
        watcher,
    },
};
use tracing::{debug, error, info};

use crate::config::ReloaderConfig;
use crate::source::{SourceKey, SourceKind, key_of};
use crate::store::{ClusterClient, KubeClient};
use crate::watch_index::WatchIndex;
use crate::workload::{Workload, WorkloadId, WorkloadKind};
use events::EventPublisher;
pub use reconcile::{Outcome, error_policy, reconcile, reconcile_workload};

pub const CONTROLLER_NAME: &str = "oprc-reloader";

/// State shared by every reconcile of every kind.
pub struct ControllerContext<C: ClusterClient> {
    pub client: C,
    pub index: WatchIndex,
    pub events: Arc<dyn EventPublisher>,
    pub cfg: ReloaderConfig,
}

impl<C: ClusterClient> ControllerContext<C> {
    pub fn new(
        client: C,
        events: Arc<dyn EventPublisher>,
        cfg: ReloaderConfig,
    ) -> Self {
        Self {
            client,
            index: WatchIndex::new(),
            events,
            cfg,
        }
    }
}

/// Fan one ConfigMap/Secret change out to the workloads of kind `K` that
/// depend on it.
pub fn requests_for<K: Workload>(
    index: &WatchIndex,
    source: &SourceKey,
) -> Vec<ObjectRef<K>> {
    index
        .lookup(source)
        .into_iter()
        .filter(|id| id.kind == K::KIND)
        .map(|id| ObjectRef::new(&id.name).within(&id.namespace))
        .collect()
}

fn api_for<K: Workload>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn source_api<R>(client: &Client, namespace: Option<&str>) -> Api<R>
where
    R: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    R::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run one controller per enabled workload kind until shutdown.
pub async fn run_controllers(
    ctx: Arc<ControllerContext<KubeClient>>,
) -> anyhow::Result<()> {
    let kinds = ctx.cfg.enabled_kinds();
    if kinds.is_empty() {
        anyhow::bail!("no workload kinds enabled; check OPRC_RELOADER_KINDS");
    }
    let runs = kinds.into_iter().map(|kind| match kind {
        WorkloadKind::Deployment => run_for::<Deployment>(ctx.clone()).boxed(),
        WorkloadKind::StatefulSet => {
            run_for::<StatefulSet>(ctx.clone()).boxed()
        }
        WorkloadKind::DaemonSet => run_for::<DaemonSet>(ctx.clone()).boxed(),
    });
    futures_util::future::join_all(runs).await;
    Ok(())
}

async fn run_for<K: Workload>(ctx: Arc<ControllerContext<KubeClient>>) {
    let client = ctx.client.client().clone();
    let ns = ctx.cfg.namespace.as_deref();
    let wc = watcher::Config::default();

    let cm_index = ctx.index.clone();
    let secret_index = ctx.index.clone();
    let done_index = ctx.index.clone();
    let cfg = controller::Config::default()
        .concurrency(ctx.cfg.reconcile_concurrency);

    info!(kind = %K::KIND, namespace = ?ns, "starting controller");
    let controller = Controller::new(api_for::<K>(&client, ns), wc.clone())
        .with_config(cfg)
        .watches(
            source_api::<ConfigMap>(&client, ns),
            wc.clone(),
            move |cm| {
                requests_for::<K>(&cm_index, &key_of(SourceKind::ConfigMap, &cm))
            },
        )
        .watches(
            source_api::<Secret>(&client, ns),
            wc.clone(),
            move |secret| {
                requests_for::<K>(
                    &secret_index,
                    &key_of(SourceKind::Secret, &secret),
                )
            },
        )
        .shutdown_on_signal()
        .run(reconcile::<K, KubeClient>, error_policy::<K, KubeClient>, ctx.clone())
        .for_each(move |res| {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(kind = %K::KIND, object = %obj_ref, ?action, "reconciled")
                }
                // A request for a workload no longer in the cache means it
                // was deleted; drop whatever it still watched.
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    let id = WorkloadId::new(
                        K::KIND,
                        obj_ref.namespace.as_deref().unwrap_or("default"),
                        &obj_ref.name,
                    );
                    debug!(workload = %id, "workload gone; unwatching");
                    done_index.unwatch(&id);
                }
                Err(e) => error!(kind = %K::KIND, error = ?e, "reconcile error"),
            }
            future::ready(())
        });

    tokio::select! {
        _ = controller => {}
        _ = unwatch_deleted::<K>(api_for::<K>(&client, ns), wc, ctx.index.clone()) => {}
    }
    info!(kind = %K::KIND, "controller stopped");
}

/// Drops index entries as soon as a workload delete is observed, without
/// waiting for one of its sources to change.
async fn unwatch_deleted<K: Workload>(
    api: Api<K>,
    wc: watcher::Config,
    index: WatchIndex,
) {
    watcher(api, wc)
        .default_backoff()
        .for_each(|event| {
            match event {
                Ok(watcher::Event::Delete(obj)) => {
                    let id = WorkloadId::of(&obj);
                    debug!(workload = %id, "workload deleted; unwatching");
                    index.unwatch(&id);
                }
                Ok(_) => {}
                Err(e) => debug!(kind = %K::KIND, error = %e, "workload watch error"),
            }
            future::ready(())
        })
        .await;
}
