//! Scheduling quarantine for workloads created before their dependencies.
//!
//! A quarantined workload has its pod template pointed at a scheduler name
//! nobody serves, so its pods stay Pending instead of crash-looping on a
//! missing mount. The original scheduler name is parked in a workload
//! annotation and put back once every required source resolves.

use kube::ResourceExt;

use crate::annotations::{SCHEDULING_DISABLED, SCHEDULING_DISABLED_SCHEDULER};
use crate::workload::Workload;

pub fn is_quarantined<K: Workload>(obj: &K) -> bool {
    obj.annotations().contains_key(SCHEDULING_DISABLED)
}

/// Normal -> Quarantined. Returns whether the object changed; a no-op when
/// already quarantined or when there is no pod spec to point elsewhere.
pub fn disable_scheduling<K: Workload>(obj: &mut K) -> bool {
    if is_quarantined(obj) {
        return false;
    }
    let Some(spec) = obj.pod_spec_mut() else {
        return false;
    };
    let original = spec.scheduler_name.replace(SCHEDULING_DISABLED_SCHEDULER.into());
    obj.annotations_mut().insert(
        SCHEDULING_DISABLED.to_string(),
        original.unwrap_or_default(),
    );
    true
}

/// Quarantined -> Normal. Returns whether the object changed.
///
/// The scheduler is only put back while the template still carries the
/// sentinel; a scheduler set by someone else in the meantime is kept.
pub fn restore_scheduling<K: Workload>(obj: &mut K) -> bool {
    let Some(original) = obj.annotations_mut().remove(SCHEDULING_DISABLED)
    else {
        return false;
    };
    if let Some(spec) = obj.pod_spec_mut() {
        if spec.scheduler_name.as_deref() == Some(SCHEDULING_DISABLED_SCHEDULER)
        {
            spec.scheduler_name =
                (!original.is_empty()).then_some(original);
        }
    }
    true
}
