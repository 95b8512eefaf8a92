//! Deterministic digest over the data a workload actually consumes.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::fetch::FetchedChild;
use crate::references::RefMode;
use crate::source::SourceKind;

type Selected<'a> = BTreeMap<&'a str, BTreeMap<&'a str, &'a [u8]>>;

/// BTreeMaps at every level give a canonical key order regardless of the
/// order children were fetched in.
#[derive(Serialize, Default)]
struct HashInput<'a> {
    #[serde(rename = "configMaps")]
    config_maps: Selected<'a>,
    secrets: Selected<'a>,
}

/// SHA-256 over the selected fields of `children`, as lowercase hex.
///
/// Only field data contributes: metadata, unselected fields and sources
/// outside the reference set never change the result. A field named by a
/// field-set reference but absent from the source is omitted.
pub fn compute_hash(children: &[FetchedChild]) -> String {
    let mut input = HashInput::default();
    for child in children {
        let bucket = match child.kind {
            SourceKind::ConfigMap => &mut input.config_maps,
            SourceKind::Secret => &mut input.secrets,
        };
        let fields = bucket.entry(child.reference.name.as_str()).or_default();
        match &child.reference.mode {
            RefMode::Whole => {
                for (k, v) in &child.source.data {
                    fields.insert(k.as_str(), v.as_slice());
                }
            }
            RefMode::Fields(selected) => {
                for k in selected.keys() {
                    if let Some((k, v)) = child.source.data.get_key_value(k) {
                        fields.insert(k.as_str(), v.as_slice());
                    }
                }
            }
        }
    }
    // Serialising maps of strings and byte slices cannot fail.
    let bytes = serde_json::to_vec(&input).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
