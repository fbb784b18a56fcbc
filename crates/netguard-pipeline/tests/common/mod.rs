//! Shared fixtures for NetGuard pipeline integration tests.

#![allow(dead_code)]

use netguard_pipeline::{
    CollectionRef, Document, NETWORK_FEATURES, NETWORK_TARGET, PipelineConfig, Table, TargetVector,
};
use serde_json::json;
use std::path::Path;

/// Features that carry the label signal in [`network_documents`].
pub const SIGNAL_FEATURES: usize = 6;

/// Rows `i` with `i % 5 < 3` are safe, so 100 rows give 60 safe / 40 not safe.
pub fn is_safe(i: usize) -> bool {
    i % 5 < 3
}

/// Synthetic network records with a learnable label.
///
/// The first [`SIGNAL_FEATURES`] columns follow the label (`-1` safe, `1` not
/// safe); the rest cycle through `-1, 0, 1`. Every 20th row has a null
/// `port`, which stays under the default 10% null threshold.
pub fn network_documents(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            let signal = if is_safe(i) { -1 } else { 1 };
            let mut doc = Document::new();
            doc.insert("_id".to_string(), json!(format!("rec-{i:04}")));
            for (j, name) in NETWORK_FEATURES.iter().enumerate() {
                let value = if j < SIGNAL_FEATURES {
                    json!(signal)
                } else if *name == "port" && i % 20 == 0 {
                    serde_json::Value::Null
                } else {
                    json!(((i * 7 + j * 3) % 3) as i64 - 1)
                };
                doc.insert((*name).to_string(), value);
            }
            doc.insert(NETWORK_TARGET.to_string(), json!(signal));
            doc
        })
        .collect()
}

/// Records whose features carry no information about the label.
pub fn uninformative_documents(n: usize) -> Vec<Document> {
    network_documents(n)
        .into_iter()
        .map(|mut doc| {
            for name in NETWORK_FEATURES {
                doc.insert(name.to_string(), json!(0));
            }
            doc
        })
        .collect()
}

pub fn labels(docs: &[Document]) -> TargetVector {
    docs.iter().map(|doc| u8::from(doc[NETWORK_TARGET] == json!(1))).collect()
}

/// The feature columns of `docs` as a prediction input (no id, no target).
pub fn feature_table(docs: &[Document]) -> Table {
    let stripped: Vec<Document> = docs
        .iter()
        .map(|doc| {
            let mut doc = doc.clone();
            doc.remove(NETWORK_TARGET);
            doc
        })
        .collect();
    Table::from_documents(&stripped, "_id").unwrap()
}

pub fn config(artifacts_root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.artifacts.root = artifacts_root.to_path_buf();
    config.training.min_f1 = 0.7;
    config
}

pub fn collection() -> CollectionRef {
    PipelineConfig::default().source.collection_ref()
}
