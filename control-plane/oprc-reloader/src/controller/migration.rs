//! Cleanup of the owner-reference/finalizer scheme used by earlier releases.
//!
//! Those releases made every referenced ConfigMap/Secret carry an owner
//! reference back to the workload and guarded the workload with a
//! finalizer. Both are stripped here; the finalizer goes last so its absence
//! means the migration finished.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use super::events::{
    ACTION_MIGRATE, EventPublisher, REASON_MIGRATION_COMPLETED,
    REASON_MIGRATION_FAILED,
};
use crate::annotations::LEGACY_FINALIZER;
use crate::error::Error;
use crate::source::SourceKind;
use crate::store::ClusterClient;
use crate::workload::Workload;

/// Returns `Ok(false)` when there is nothing to migrate. A partial failure
/// keeps the finalizer so the next trigger retries the remaining sources.
#[instrument(skip_all, fields(kind = %K::KIND, ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any()))]
pub async fn migrate<K: Workload, C: ClusterClient>(
    obj: &K,
    client: &C,
    events: &dyn EventPublisher,
) -> Result<bool, Error> {
    if !obj.finalizers().iter().any(|f| f == LEGACY_FINALIZER) {
        return Ok(false);
    }
    let ns = obj.namespace().unwrap_or_else(|| "default".into());
    let uid = obj.uid();
    let name = obj.name_any();
    let obj_ref = obj.object_ref(&());

    let mut total = 0;
    let mut failed = 0;
    for kind in [SourceKind::ConfigMap, SourceKind::Secret] {
        for mut source in client.list_sources(&ns, kind).await? {
            let Some(owners) = source.metadata.owner_references.as_mut() else {
                continue;
            };
            let before = owners.len();
            owners.retain(|o| match &uid {
                Some(uid) => &o.uid != uid,
                None => !(o.kind == K::KIND.as_str() && o.name == name),
            });
            if owners.len() == before {
                continue;
            }
            total += 1;
            if let Err(e) = client.update_source_owners(&source).await {
                warn!(source = %source.name(), ?kind, error = %e, "failed to strip legacy owner reference");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        publish(
            events,
            &obj_ref,
            EventType::Warning,
            REASON_MIGRATION_FAILED,
            format!("{failed} of {total} legacy owner references could not be removed"),
        )
        .await;
        return Err(Error::MigrationPartialFailure { failed, total });
    }

    let mut updated = obj.clone();
    updated.finalizers_mut().retain(|f| f != LEGACY_FINALIZER);
    client.replace_workload(&updated).await?;
    info!(stripped = total, "legacy migration completed");
    publish(
        events,
        &obj_ref,
        EventType::Normal,
        REASON_MIGRATION_COMPLETED,
        format!("Removed {total} legacy owner references and the legacy finalizer"),
    )
    .await;
    Ok(true)
}

async fn publish(
    events: &dyn EventPublisher,
    obj_ref: &ObjectReference,
    type_: EventType,
    reason: &str,
    note: String,
) {
    events
        .publish(obj_ref, type_, reason, ACTION_MIGRATE, Some(note))
        .await;
}
