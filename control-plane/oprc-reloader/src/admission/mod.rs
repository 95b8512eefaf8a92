//! Synchronous hash stamping for workload create/update requests.
//!
//! Gives a workload its config hash at write time so the first rollout
//! already carries it. The controller stays the authority; this path never
//! touches the watch index and never persists anything itself.

pub mod webhook;

use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::annotations::is_opted_in;
use crate::controller::events::{
    ACTION_ADMIT, EventPublisher, REASON_CONFIG_HASH_UPDATED,
    REASON_SCHEDULING_DISABLED,
};
use crate::error::{Error, MissingChildren};
use crate::fetch::{FetchOptions, fetch_children};
use crate::hash::compute_hash;
use crate::quarantine;
use crate::references::{add_extra_references, classify};
use crate::store::ClusterClient;
use crate::workload::{Workload, set_stored_hash, stored_hash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// No opt-in marker; object untouched.
    Skipped,
    /// Create with required children missing; scheduling disabled.
    Quarantined(MissingChildren),
    /// Update with required children missing; object untouched.
    Deferred(MissingChildren),
    Hashed { hash: String, changed: bool },
}

impl Admission {
    pub fn mutated(&self) -> bool {
        match self {
            Admission::Quarantined(_) => true,
            Admission::Hashed { changed, .. } => *changed,
            Admission::Skipped | Admission::Deferred(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRequestInfo {
    pub dry_run: bool,
    pub is_create: bool,
}

/// Mutates `obj` in place. Events are only published for real requests;
/// a dry run returns the same mutation without side effects.
#[instrument(skip_all, fields(kind = %K::KIND, ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any(), dry_run = req.dry_run, create = req.is_create))]
pub async fn admit<K: Workload, C: ClusterClient>(
    client: &C,
    events: &dyn EventPublisher,
    obj: &mut K,
    req: AdmissionRequestInfo,
    opts: FetchOptions,
) -> Result<Admission, Error> {
    if !is_opted_in(obj.annotations()) {
        return Ok(Admission::Skipped);
    }
    let ns = obj.namespace().unwrap_or_else(|| "default".into());

    let mut refs = obj.pod_template().map(classify).unwrap_or_default();
    add_extra_references(&mut refs, obj.annotations(), &ns);

    let children = match fetch_children(client, &ns, &refs, opts).await {
        Ok(children) => children,
        Err(Error::MissingChildren(missing)) if req.is_create => {
            if !quarantine::disable_scheduling(obj) {
                debug!(%missing, "children missing but nothing to quarantine");
                return Ok(Admission::Deferred(missing));
            }
            info!(%missing, "required children missing at create; scheduling disabled");
            if !req.dry_run {
                events
                    .publish(
                        &obj.object_ref(&()),
                        EventType::Warning,
                        REASON_SCHEDULING_DISABLED,
                        ACTION_ADMIT,
                        Some(format!(
                            "Scheduling disabled until required configuration exists: {missing}"
                        )),
                    )
                    .await;
            }
            return Ok(Admission::Quarantined(missing));
        }
        Err(Error::MissingChildren(missing)) => {
            debug!(%missing, "required children missing at update; left unmutated");
            return Ok(Admission::Deferred(missing));
        }
        Err(e) => return Err(e),
    };

    let hash = compute_hash(&children);
    let changed = stored_hash(obj) != Some(hash.as_str());
    if changed {
        set_stored_hash(obj, &hash);
        info!(%hash, "config hash stamped");
        if !req.dry_run {
            events
                .publish(
                    &obj.object_ref(&()),
                    EventType::Normal,
                    REASON_CONFIG_HASH_UPDATED,
                    ACTION_ADMIT,
                    Some(format!("Configuration hash set to {hash}")),
                )
                .await;
        }
    }
    Ok(Admission::Hashed { hash, changed })
}
