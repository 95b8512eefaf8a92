use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::ControllerContext;
use super::events::{
    ACTION_RECONCILE, REASON_CONFIG_HASH_UPDATED, REASON_SCHEDULING_RESTORED,
};
use super::migration;
use crate::annotations::{LEGACY_FINALIZER, is_opted_in};
use crate::error::{Error, MissingChildren};
use crate::fetch::fetch_children;
use crate::hash::compute_hash;
use crate::quarantine;
use crate::references::{add_extra_references, classify};
use crate::store::ClusterClient;
use crate::workload::{Workload, WorkloadId, set_stored_hash, stored_hash};

/// What a single reconcile pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Legacy owner references were stripped and the finalizer removed.
    Migrated,
    /// Some back-references could not be stripped; finalizer kept.
    MigrationIncomplete { failed: usize, total: usize },
    /// Not opted in (or going away); removed from the watch index.
    Unwatched,
    /// Required children absent; nothing written.
    Deferred(MissingChildren),
    Unchanged { hash: String },
    Updated { hash: String, scheduling_restored: bool },
    /// The write lost a race with another writer.
    Conflict,
}

impl Outcome {
    pub fn action<C: ClusterClient>(&self, ctx: &ControllerContext<C>) -> Action {
        match self {
            Outcome::Conflict => Action::requeue(ctx.cfg.conflict_requeue()),
            Outcome::MigrationIncomplete { .. } => {
                Action::requeue(ctx.cfg.migration_requeue())
            }
            _ => Action::await_change(),
        }
    }
}

/// Controller entry point. Recoverable outcomes become requeue actions;
/// only transport failures reach the error policy.
pub async fn reconcile<K: Workload, C: ClusterClient>(
    obj: Arc<K>,
    ctx: Arc<ControllerContext<C>>,
) -> Result<Action, Error> {
    let outcome = reconcile_workload(obj.as_ref(), ctx.as_ref()).await?;
    Ok(outcome.action(ctx.as_ref()))
}

#[instrument(skip_all, fields(kind = %K::KIND, ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile_workload<K: Workload, C: ClusterClient>(
    obj: &K,
    ctx: &ControllerContext<C>,
) -> Result<Outcome, Error> {
    let id = WorkloadId::of(obj);

    if obj.finalizers().iter().any(|f| f == LEGACY_FINALIZER) {
        info!(workload = %id, "legacy finalizer present; migrating");
        return match migration::migrate(obj, &ctx.client, ctx.events.as_ref())
            .await
        {
            Ok(_) => Ok(Outcome::Migrated),
            Err(Error::MigrationPartialFailure { failed, total }) => {
                Ok(Outcome::MigrationIncomplete { failed, total })
            }
            Err(Error::PersistConflict(msg)) => {
                debug!(workload = %id, %msg, "finalizer removal conflicted");
                Ok(Outcome::Conflict)
            }
            Err(e) => Err(e),
        };
    }

    if obj.meta().deletion_timestamp.is_some() || !is_opted_in(obj.annotations()) {
        ctx.index.unwatch(&id);
        debug!(workload = %id, "not opted in; unwatched");
        return Ok(Outcome::Unwatched);
    }

    let mut refs = obj.pod_template().map(classify).unwrap_or_default();
    add_extra_references(&mut refs, obj.annotations(), &id.namespace);
    // Subscribe before fetching: a child created between here and the fetch
    // is then either seen by the fetch or announced by its watch event.
    ctx.index.resync(&id, &refs);

    let children = match fetch_children(
        &ctx.client,
        &id.namespace,
        &refs,
        ctx.cfg.fetch_options(),
    )
    .await
    {
        Ok(children) => children,
        Err(Error::MissingChildren(missing)) => {
            info!(workload = %id, %missing, "required children missing; waiting for them to appear");
            return Ok(Outcome::Deferred(missing));
        }
        Err(e) => return Err(e),
    };

    let hash = compute_hash(&children);
    let mut updated = obj.clone();
    let scheduling_restored = quarantine::restore_scheduling(&mut updated);
    // No pod template means nowhere to stamp the hash.
    let hash_changed = stored_hash(obj) != Some(hash.as_str())
        && set_stored_hash(&mut updated, &hash);

    if !hash_changed && !scheduling_restored {
        debug!(workload = %id, %hash, "config hash unchanged");
        return Ok(Outcome::Unchanged { hash });
    }

    match ctx.client.replace_workload(&updated).await {
        Ok(_) => {}
        Err(e) => match Error::from(e) {
            Error::PersistConflict(msg) => {
                debug!(workload = %id, %msg, "update conflicted; will retry");
                return Ok(Outcome::Conflict);
            }
            e => return Err(e),
        },
    }

    let obj_ref = obj.object_ref(&());
    if scheduling_restored {
        info!(workload = %id, "scheduling restored");
        ctx.events
            .publish(
                &obj_ref,
                EventType::Normal,
                REASON_SCHEDULING_RESTORED,
                ACTION_RECONCILE,
                Some("All required configuration is present; scheduling restored".into()),
            )
            .await;
    }
    if hash_changed {
        info!(workload = %id, %hash, "config hash updated");
        ctx.events
            .publish(
                &obj_ref,
                EventType::Normal,
                REASON_CONFIG_HASH_UPDATED,
                ACTION_RECONCILE,
                Some(format!("Configuration hash updated to {hash}")),
            )
            .await;
    }

    Ok(Outcome::Updated {
        hash,
        scheduling_restored,
    })
}

pub fn error_policy<K: Workload, C: ClusterClient>(
    obj: Arc<K>,
    error: &Error,
    ctx: Arc<ControllerContext<C>>,
) -> Action {
    warn!(
        kind = %K::KIND,
        ns = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
        error = %error,
        "reconcile failed; requeueing"
    );
    Action::requeue(ctx.cfg.error_requeue())
}
