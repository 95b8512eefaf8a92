//! Concurrent resolution of a reference set into live source contents.

use std::time::Duration;

use futures_util::{StreamExt, stream};
use tracing::{debug, instrument, warn};

use crate::error::{Error, MissingChild, MissingChildren};
use crate::references::{ConfigReference, ReferenceSet};
use crate::source::{ConfigSource, SourceKey, SourceKind};
use crate::store::{ClusterClient, StoreError};

/// A resolved reference together with the data it selects from.
#[derive(Debug, Clone)]
pub struct FetchedChild {
    pub kind: SourceKind,
    pub reference: ConfigReference,
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Max in-flight gets for one call.
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Fetch every referenced source, one get per distinct source name.
///
/// All gets complete before the outcome is judged: a transport failure on
/// any get is returned as [`Error::Transport`]; otherwise every absent
/// required source is reported together in [`Error::MissingChildren`].
/// Absent optional sources are left out of the result.
#[instrument(level = "debug", skip(client, refs), fields(ns = %namespace, refs = refs.len()))]
pub async fn fetch_children<C: ClusterClient>(
    client: &C,
    namespace: &str,
    refs: &ReferenceSet,
    opts: FetchOptions,
) -> Result<Vec<FetchedChild>, Error> {
    let wanted: Vec<(SourceKey, ConfigReference)> = refs
        .iter()
        .map(|(kind, reference)| {
            (SourceKey::new(kind, namespace, &reference.name), reference.clone())
        })
        .collect();
    let gets = stream::iter(wanted)
        .map(|(key, reference)| async move {
            let res = client.get_source(&key).await;
            (key, reference, res)
        })
        .buffer_unordered(opts.concurrency.max(1))
        .collect::<Vec<_>>();

    let results = tokio::time::timeout(opts.timeout, gets)
        .await
        .map_err(|_| {
            Error::Transport(format!(
                "fetching children in {namespace} timed out after {:?}",
                opts.timeout
            ))
        })?;

    let mut fetched = Vec::with_capacity(results.len());
    let mut missing = Vec::new();
    let mut transport: Vec<String> = Vec::new();

    for (key, reference, res) in results {
        match res {
            Ok(Some(source)) => fetched.push(FetchedChild {
                kind: key.kind,
                reference,
                source,
            }),
            Ok(None) if reference.optional => {
                debug!(source = %key, "optional source absent; skipped");
            }
            Ok(None) => missing.push(MissingChild {
                fields: reference
                    .required_fields()
                    .into_iter()
                    .map(String::from)
                    .collect(),
                source: key,
            }),
            Err(StoreError::Transport(msg) | StoreError::Conflict(msg)) => {
                warn!(source = %key, error = %msg, "fetching source failed");
                transport.push(format!("{key}: {msg}"));
            }
        }
    }

    if !transport.is_empty() {
        return Err(Error::Transport(transport.join("; ")));
    }
    if !missing.is_empty() {
        missing.sort_by(|a, b| a.source.cmp(&b.source));
        return Err(Error::MissingChildren(MissingChildren(missing)));
    }
    Ok(fetched)
}
