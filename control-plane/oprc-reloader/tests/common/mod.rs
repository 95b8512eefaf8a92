#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PodSpec,
    PodTemplateSpec, SecretKeySelector, Volume,
};
use kube::core::ObjectMeta;
use oprc_reloader::annotations::UPDATE_ON_CONFIG_CHANGE;
use oprc_reloader::config::ReloaderConfig;
use oprc_reloader::controller::events::RecordingEventPublisher;
use oprc_reloader::controller::{ControllerContext, Outcome, reconcile_workload};
use oprc_reloader::store::MemoryCluster;
use oprc_reloader::workload::Workload;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

// Env guard utilities
pub struct EnvGuard {
    key: &'static str,
    old: Option<String>,
}
impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            if let Some(ref v) = self.old {
                std::env::set_var(self.key, v);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }
}
pub fn set_env(key: &'static str, val: &str) -> EnvGuard {
    let old = std::env::var(key).ok();
    unsafe {
        std::env::set_var(key, val);
    }
    EnvGuard { key, old }
}

pub type TestContext = Arc<ControllerContext<MemoryCluster>>;

/// Controller context over an empty in-memory cluster, plus the recorder
/// its events land in.
pub fn test_context() -> (TestContext, Arc<RecordingEventPublisher>) {
    let events = Arc::new(RecordingEventPublisher::new());
    let ctx = ControllerContext::new(
        MemoryCluster::new(),
        events.clone(),
        ReloaderConfig::default(),
    );
    (Arc::new(ctx), events)
}

/// Reconcile the cluster's current copy of a workload, the way a watch
/// event would hand it to the controller.
pub async fn reconcile_current<K: Workload>(
    ctx: &TestContext,
    ns: &str,
    name: &str,
) -> Outcome {
    let obj: K = ctx
        .client
        .workload(ns, name)
        .unwrap_or_else(|| panic!("workload {ns}/{name} not stored"));
    reconcile_workload(&obj, ctx.as_ref()).await.expect("reconcile")
}

pub struct DeploymentBuilder {
    inner: Deployment,
}

impl DeploymentBuilder {
    pub fn new(ns: &str, name: &str) -> Self {
        let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
        Self {
            inner: Deployment {
                metadata: ObjectMeta {
                    name: Some(name.into()),
                    namespace: Some(ns.into()),
                    uid: Some(format!("uid-{name}")),
                    ..Default::default()
                },
                spec: Some(DeploymentSpec {
                    selector: k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
                        match_labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            containers: vec![Container {
                                name: "app".into(),
                                image: Some("nginx".into()),
                                ..Default::default()
                            }],
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    pub fn opted_in(self) -> Self {
        self.annotation(UPDATE_ON_CONFIG_CHANGE, "true")
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.inner
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }

    pub fn finalizer(mut self, finalizer: &str) -> Self {
        self.inner
            .metadata
            .finalizers
            .get_or_insert_with(Default::default)
            .push(finalizer.into());
        self
    }

    pub fn scheduler(mut self, scheduler: &str) -> Self {
        self.pod_spec().scheduler_name = Some(scheduler.into());
        self
    }

    pub fn config_map_volume(mut self, config_map: &str) -> Self {
        self.pod_spec()
            .volumes
            .get_or_insert_with(Default::default)
            .push(Volume {
                name: format!("{config_map}-vol"),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map.into(),
                    ..Default::default()
                }),
                ..Default::default()
            });
        self
    }

    pub fn secret_key_env(mut self, secret: &str, key: &str, optional: bool) -> Self {
        self.pod_spec().containers[0]
            .env
            .get_or_insert_with(Default::default)
            .push(EnvVar {
                name: key.to_uppercase(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret.into(),
                        key: key.into(),
                        optional: optional.then_some(true),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
        self
    }

    fn pod_spec(&mut self) -> &mut PodSpec {
        self.inner
            .pod_spec_mut()
            .expect("builder always carries a pod spec")
    }

    pub fn build(self) -> Deployment {
        self.inner
    }
}
