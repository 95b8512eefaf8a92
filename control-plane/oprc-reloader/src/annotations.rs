//! Annotation keys and sentinel values that make up the on-object contract
//! with operators and with the rollout machinery of the workload kinds.

/// Opt-in marker on the workload. Only the value `"true"` enables reloading.
pub const UPDATE_ON_CONFIG_CHANGE: &str =
    "reloader.oaas.io/update-on-config-change";
pub const UPDATE_ON_CONFIG_CHANGE_VALUE: &str = "true";

/// Written into the pod template; changing it is what rolls the pods.
pub const CONFIG_HASH: &str = "reloader.oaas.io/config-hash";

/// Present while scheduling is disabled; holds the original scheduler name.
pub const SCHEDULING_DISABLED: &str = "reloader.oaas.io/scheduling-disabled";

/// Scheduler name used while quarantined. No scheduler registers under it.
pub const SCHEDULING_DISABLED_SCHEDULER: &str =
    "oprc-reloader-scheduling-disabled";

/// Finalizer of the old owner-reference based tracking scheme.
pub const LEGACY_FINALIZER: &str = "reloader.oaas.io/finalizer";

/// Comma separated ConfigMap names the workload depends on without
/// referencing them from its pod template.
pub const EXTRA_CONFIGMAPS: &str = "reloader.oaas.io/extra-configmaps";
pub const EXTRA_SECRETS: &str = "reloader.oaas.io/extra-secrets";

use std::collections::BTreeMap;

pub fn is_opted_in(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(UPDATE_ON_CONFIG_CHANGE)
        .map(|v| v.eq_ignore_ascii_case(UPDATE_ON_CONFIG_CHANGE_VALUE))
        .unwrap_or(false)
}
