use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use oprc_reloader::Error;
use oprc_reloader::annotations::{
    EXTRA_CONFIGMAPS, EXTRA_SECRETS, LEGACY_FINALIZER, SCHEDULING_DISABLED,
    SCHEDULING_DISABLED_SCHEDULER, UPDATE_ON_CONFIG_CHANGE,
};
use oprc_reloader::controller::events::{
    REASON_CONFIG_HASH_UPDATED, REASON_MIGRATION_COMPLETED,
    REASON_SCHEDULING_RESTORED,
};
use oprc_reloader::controller::{
    Outcome, reconcile, reconcile_workload, requests_for,
};
use oprc_reloader::quarantine;
use oprc_reloader::source::{SourceKey, SourceKind};
use oprc_reloader::workload::{Workload, WorkloadId, WorkloadKind, stored_hash};

mod common;
use common::{DeploymentBuilder, reconcile_current, test_context, uniq};

fn cm(ns: &str, name: &str) -> SourceKey {
    SourceKey::new(SourceKind::ConfigMap, ns, name)
}

fn hash_of(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Updated { hash, .. } | Outcome::Unchanged { hash } => hash.clone(),
        other => panic!("expected a hash outcome, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn hash_follows_referenced_data_only() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.put_secret(&ns, "b", &[("k1", "v")]);
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .secret_key_env("b", "k1", false)
            .secret_key_env("b", "k2", true)
            .build(),
    );

    let first = reconcile_current::<Deployment>(&ctx, &ns, "w").await;
    assert!(matches!(first, Outcome::Updated { scheduling_restored: false, .. }));
    let h1 = hash_of(&first);
    let stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    assert_eq!(stored_hash(&stored), Some(h1.as_str()));

    // New field on a whole-object reference.
    ctx.client.put_config_map(&ns, "a", &[("x", "1"), ("y", "2")]);
    let h2 = hash_of(&reconcile_current::<Deployment>(&ctx, &ns, "w").await);
    assert_ne!(h1, h2);

    // Field nobody selects.
    ctx.client.put_secret(&ns, "b", &[("k1", "v"), ("k3", "z")]);
    let writes = ctx.client.workload_writes();
    let third = reconcile_current::<Deployment>(&ctx, &ns, "w").await;
    assert_eq!(third, Outcome::Unchanged { hash: h2.clone() });
    assert_eq!(ctx.client.workload_writes(), writes);

    assert_eq!(
        events.reasons(),
        vec![REASON_CONFIG_HASH_UPDATED, REASON_CONFIG_HASH_UPDATED]
    );
}

#[test_log::test(tokio::test)]
async fn removing_marker_drops_watches_and_keeps_hash() {
    let (ctx, _events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .build(),
    );
    let hash = hash_of(&reconcile_current::<Deployment>(&ctx, &ns, "w").await);
    assert_eq!(
        requests_for::<Deployment>(&ctx.index, &cm(&ns, "a")),
        vec![ObjectRef::new("w").within(&ns)]
    );

    let mut stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    stored.annotations_mut().remove(UPDATE_ON_CONFIG_CHANGE);
    ctx.client.put_workload(stored);

    let writes = ctx.client.workload_writes();
    assert_eq!(
        reconcile_current::<Deployment>(&ctx, &ns, "w").await,
        Outcome::Unwatched
    );
    assert!(ctx.index.is_empty());
    assert!(requests_for::<Deployment>(&ctx.index, &cm(&ns, "a")).is_empty());
    assert_eq!(ctx.client.workload_writes(), writes);

    let stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    assert_eq!(stored_hash(&stored), Some(hash.as_str()));
}

#[test_log::test(tokio::test)]
async fn deferred_reconcile_is_woken_by_the_missing_source() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .build(),
    );

    let outcome = reconcile_current::<Deployment>(&ctx, &ns, "w").await;
    let Outcome::Deferred(missing) = outcome else {
        panic!("expected deferral");
    };
    assert_eq!(missing.names(), vec![format!("ConfigMap/{ns}/a")]);
    assert_eq!(ctx.client.workload_writes(), 0);
    assert!(events.events().is_empty());

    // The create event for `a` must map back to the waiting workload.
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    assert_eq!(
        requests_for::<Deployment>(&ctx.index, &cm(&ns, "a")),
        vec![ObjectRef::new("w").within(&ns)]
    );
    assert!(matches!(
        reconcile_current::<Deployment>(&ctx, &ns, "w").await,
        Outcome::Updated { .. }
    ));
}

#[test_log::test(tokio::test)]
async fn quarantine_is_lifted_once_children_exist() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    let mut d = DeploymentBuilder::new(&ns, "w")
        .opted_in()
        .scheduler("custom-scheduler")
        .config_map_volume("a")
        .build();
    // What the webhook does to a create that arrives before its ConfigMap.
    assert!(quarantine::disable_scheduling(&mut d));
    ctx.client.put_workload(d);

    assert!(matches!(
        reconcile_current::<Deployment>(&ctx, &ns, "w").await,
        Outcome::Deferred(_)
    ));
    let stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    assert_eq!(
        stored.pod_spec().and_then(|s| s.scheduler_name.as_deref()),
        Some(SCHEDULING_DISABLED_SCHEDULER)
    );

    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    let outcome = reconcile_current::<Deployment>(&ctx, &ns, "w").await;
    assert!(matches!(outcome, Outcome::Updated { scheduling_restored: true, .. }));

    let stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    assert_eq!(
        stored.pod_spec().and_then(|s| s.scheduler_name.as_deref()),
        Some("custom-scheduler")
    );
    assert!(!stored.annotations().contains_key(SCHEDULING_DISABLED));
    assert_eq!(
        events.reasons(),
        vec![REASON_SCHEDULING_RESTORED, REASON_CONFIG_HASH_UPDATED]
    );
}

#[test_log::test(tokio::test)]
async fn stale_write_requeues_quickly() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    let stale = ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .build(),
    );
    // Someone else writes in between; `stale` now carries an old version.
    ctx.client.put_workload(stale.clone());

    let outcome = reconcile_workload(&stale, ctx.as_ref()).await.unwrap();
    assert_eq!(outcome, Outcome::Conflict);
    assert_eq!(outcome.action(ctx.as_ref()), Action::requeue(Duration::from_secs(1)));
    assert!(events.events().is_empty());

    // The retry works on the fresh copy.
    assert!(matches!(
        reconcile_current::<Deployment>(&ctx, &ns, "w").await,
        Outcome::Updated { .. }
    ));
}

#[test_log::test(tokio::test)]
async fn transport_failure_surfaces_for_backoff() {
    let (ctx, _events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.fail_gets(cm(&ns, "a"));
    let d = ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .build(),
    );

    let err = reconcile(Arc::new(d), ctx.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(!err.is_recoverable());
    // Watches were registered before the fetch failed.
    assert_eq!(ctx.index.len(), 1);
}

#[test_log::test(tokio::test)]
async fn converged_workload_awaits_change() {
    let (ctx, _events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .build(),
    );
    reconcile_current::<Deployment>(&ctx, &ns, "w").await;
    let current: Deployment = ctx.client.workload(&ns, "w").unwrap();
    let action = reconcile(Arc::new(current), ctx.clone()).await.unwrap();
    assert_eq!(action, Action::await_change());
}

#[test_log::test(tokio::test)]
async fn legacy_finalizer_is_migrated_before_normal_reconcile() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .finalizer(LEGACY_FINALIZER)
            .build(),
    );

    assert_eq!(
        reconcile_current::<Deployment>(&ctx, &ns, "w").await,
        Outcome::Migrated
    );
    let stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    assert!(stored.finalizers().is_empty());
    assert_eq!(stored_hash(&stored), None);
    assert!(ctx.index.is_empty());

    assert!(matches!(
        reconcile_current::<Deployment>(&ctx, &ns, "w").await,
        Outcome::Updated { .. }
    ));
    assert_eq!(
        events.reasons(),
        vec![REASON_MIGRATION_COMPLETED, REASON_CONFIG_HASH_UPDATED]
    );
}

#[test_log::test(tokio::test)]
async fn terminating_workload_is_unwatched_without_writes() {
    let (ctx, _events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .build(),
    );
    reconcile_current::<Deployment>(&ctx, &ns, "w").await;
    assert!(!ctx.index.is_empty());

    let mut stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    stored.metadata.deletion_timestamp =
        Some(serde_json::from_value(serde_json::json!("2025-01-01T00:00:00Z")).unwrap());
    let writes = ctx.client.workload_writes();
    assert_eq!(reconcile_workload(&stored, ctx.as_ref()).await.unwrap(), Outcome::Unwatched);
    assert!(ctx.index.is_empty());
    assert_eq!(ctx.client.workload_writes(), writes);
}

#[test_log::test(tokio::test)]
async fn extra_secrets_annotation_is_watched_and_hashed() {
    let (ctx, _events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_secret(&ns, "tls", &[("crt", "1")]);
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .annotation(EXTRA_SECRETS, "tls, other-ns/ignored")
            .build(),
    );

    let h1 = hash_of(&reconcile_current::<Deployment>(&ctx, &ns, "w").await);
    let id = WorkloadId::new(WorkloadKind::Deployment, &ns, "w");
    assert_eq!(
        ctx.index.watched_by(&id).into_iter().collect::<Vec<_>>(),
        vec![SourceKey::new(SourceKind::Secret, &ns, "tls")]
    );

    ctx.client.put_secret(&ns, "tls", &[("crt", "2")]);
    let h2 = hash_of(&reconcile_current::<Deployment>(&ctx, &ns, "w").await);
    assert_ne!(h1, h2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn fetch_deadline_is_a_transport_error_and_keeps_watches() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.put_secret(&ns, "b", &[("k1", "v")]);
    let d = ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .secret_key_env("b", "k1", false)
            .build(),
    );
    ctx.client.delay_gets(Duration::from_secs(60));

    let err = reconcile_workload(&d, ctx.as_ref()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got {err:?}");
    let id = WorkloadId::new(WorkloadKind::Deployment, &ns, "w");
    assert_eq!(
        ctx.index.watched_by(&id).into_iter().collect::<Vec<_>>(),
        vec![cm(&ns, "a"), SourceKey::new(SourceKind::Secret, &ns, "b")]
    );
    assert_eq!(ctx.client.workload_writes(), 0);
    assert!(events.events().is_empty());

    // Once the API answers in time the same workload converges.
    ctx.client.clear_failures();
    assert!(matches!(
        reconcile_current::<Deployment>(&ctx, &ns, "w").await,
        Outcome::Updated { .. }
    ));
}

#[test_log::test(tokio::test)]
async fn deleted_source_defers_without_touching_the_hash() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    ctx.client.put_workload(
        DeploymentBuilder::new(&ns, "w")
            .opted_in()
            .config_map_volume("a")
            .build(),
    );
    let hash = hash_of(&reconcile_current::<Deployment>(&ctx, &ns, "w").await);
    events.clear();

    assert!(ctx.client.remove_source(&cm(&ns, "a")).is_some());
    assert_eq!(
        requests_for::<Deployment>(&ctx.index, &cm(&ns, "a")),
        vec![ObjectRef::new("w").within(&ns)]
    );
    let writes = ctx.client.workload_writes();
    let Outcome::Deferred(missing) =
        reconcile_current::<Deployment>(&ctx, &ns, "w").await
    else {
        panic!("expected deferral");
    };
    assert_eq!(missing.names(), vec![format!("ConfigMap/{ns}/a")]);
    assert_eq!(ctx.client.workload_writes(), writes);
    assert!(events.events().is_empty());

    let stored: Deployment = ctx.client.workload(&ns, "w").unwrap();
    assert_eq!(stored_hash(&stored), Some(hash.as_str()));
    // The update is an ordinary update, not a create: no quarantine.
    assert!(!stored.annotations().contains_key(SCHEDULING_DISABLED));
}

#[test_log::test(tokio::test)]
async fn workload_without_pod_template_is_never_rewritten() {
    let (ctx, events) = test_context();
    let ns = uniq("ns");
    ctx.client.put_config_map(&ns, "a", &[("x", "1")]);
    let mut d = DeploymentBuilder::new(&ns, "w")
        .opted_in()
        .annotation(EXTRA_CONFIGMAPS, "a")
        .build();
    d.spec = None;
    ctx.client.put_workload(d);

    for _ in 0..2 {
        assert!(matches!(
            reconcile_current::<Deployment>(&ctx, &ns, "w").await,
            Outcome::Unchanged { .. }
        ));
    }
    assert_eq!(ctx.client.workload_writes(), 0);
    assert!(events.events().is_empty());
}
