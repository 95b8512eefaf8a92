//! `AdmissionReview` handling for the mutating webhook route.

use std::sync::Arc;

use axum::{Json, extract::State};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::api::DynamicObject;
use kube::core::admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, Operation,
};
use tracing::{debug, error, warn};

use super::{AdmissionRequestInfo, admit};
use crate::controller::events::EventPublisher;
use crate::error::Error;
use crate::fetch::FetchOptions;
use crate::store::ClusterClient;
use crate::workload::{Workload, WorkloadKind};

pub struct WebhookState<C: ClusterClient> {
    pub client: C,
    pub events: Arc<dyn EventPublisher>,
    pub fetch: FetchOptions,
}

pub async fn mutate_handler<C: ClusterClient>(
    State(state): State<Arc<WebhookState<C>>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "invalid admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(review(&state, &req).await.into_review())
}

/// Answer one admission request. Failures deny the request so the client
/// retries instead of admitting a workload without its hash.
pub async fn review<C: ClusterClient>(
    state: &WebhookState<C>,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let Some(obj) = req.object.as_ref() else {
        debug!(uid = %req.uid, "no object in request; allowing");
        return AdmissionResponse::from(req);
    };
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return AdmissionResponse::from(req);
    }
    let info = AdmissionRequestInfo {
        dry_run: req.dry_run,
        is_create: matches!(req.operation, Operation::Create),
    };

    let result = match WorkloadKind::parse(&req.kind.kind) {
        Some(WorkloadKind::Deployment) => {
            patch_for::<Deployment, C>(state, obj, info).await
        }
        Some(WorkloadKind::StatefulSet) => {
            patch_for::<StatefulSet, C>(state, obj, info).await
        }
        Some(WorkloadKind::DaemonSet) => {
            patch_for::<DaemonSet, C>(state, obj, info).await
        }
        None => {
            debug!(uid = %req.uid, kind = %req.kind.kind, "not a workload kind; allowing");
            return AdmissionResponse::from(req);
        }
    };

    match result {
        Ok(None) => AdmissionResponse::from(req),
        Ok(Some(patch)) => match AdmissionResponse::from(req).with_patch(patch) {
            Ok(response) => response,
            Err(e) => {
                error!(uid = %req.uid, error = %e, "failed to serialize patch");
                AdmissionResponse::from(req)
                    .deny(format!("patch serialization error: {e}"))
            }
        },
        Err(e) => {
            warn!(uid = %req.uid, error = %e, "admission failed; denying");
            AdmissionResponse::from(req).deny(e.to_string())
        }
    }
}

/// Run the engine on a typed copy and diff it against the unmutated typed
/// form, so the patch only ever carries the engine's own changes.
async fn patch_for<K: Workload, C: ClusterClient>(
    state: &WebhookState<C>,
    obj: &DynamicObject,
    info: AdmissionRequestInfo,
) -> Result<Option<json_patch::Patch>, Error> {
    let mut typed: K = serde_json::from_value(serde_json::to_value(obj)?)?;
    let before = serde_json::to_value(&typed)?;
    let outcome = admit(
        &state.client,
        state.events.as_ref(),
        &mut typed,
        info,
        state.fetch,
    )
    .await?;
    if !outcome.mutated() {
        return Ok(None);
    }
    let after = serde_json::to_value(&typed)?;
    Ok(Some(json_patch::diff(&before, &after)))
}
