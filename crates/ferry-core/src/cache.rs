//! Per-dataset hash cache in the shared store.
//!
//! The cache memoizes the translation from a file's stored checksum to its
//! value under the source repository's hash algorithm, avoiding a re-read
//! of every dataset file on each compare. It is advisory: a missing or
//! unparsable entry is an empty map, never an error, and discarding it
//! only costs recomputation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{HASHES_PREFIX, MARKER_DELETED, MARKER_WRITTEN};
use crate::error::Result;
use crate::kv::KvStore;

/// Memoized hashes of one dataset file.
///
/// The remote hashes are trustworthy only while `localHashValue` still
/// matches the checksum the dataset repository stores for the file; a
/// mismatch means the bytes changed and every translation is stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalculatedHashes {
    pub local_hash_type: String,
    pub local_hash_value: String,
    /// Hash kind → value, in the source repository's algorithms.
    pub remote_hashes: HashMap<String, String>,
}

/// The cache for a dataset: node id → calculated hashes.
pub type KnownHashes = HashMap<String, CalculatedHashes>;

/// Transient marker left by the writer the instant a remote-side change is
/// accepted, consumed by the comparator before a full re-read propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Written,
    Deleted,
}

fn hashes_key(persistent_id: &str) -> String {
    format!("{HASHES_PREFIX}{persistent_id}")
}

fn marker_key(persistent_id: &str, node_id: &str) -> String {
    format!("{persistent_id} -> {node_id}")
}

/// Read the dataset's hash cache; missing or unparsable entries are empty.
pub async fn known_hashes(store: &dyn KvStore, persistent_id: &str) -> KnownHashes {
    match store.get(&hashes_key(persistent_id)).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
        Ok(None) => KnownHashes::default(),
        Err(e) => {
            warn!(persistent_id, error = %e, "hash cache read failed");
            KnownHashes::default()
        }
    }
}

/// Replace the dataset's hash cache wholesale.
///
/// Failures are logged, not propagated: losing a cache write only costs a
/// future recomputation.
pub async fn store_known_hashes(store: &dyn KvStore, persistent_id: &str, hashes: &KnownHashes) {
    let raw = match serde_json::to_string(hashes) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(persistent_id, error = %e, "serializing hash cache failed");
            return;
        }
    };
    if let Err(e) = store.set(&hashes_key(persistent_id), &raw).await {
        warn!(persistent_id, error = %e, "hash cache write failed");
    }
}

/// Drop the dataset's hash cache entirely.
pub async fn invalidate_known_hashes(store: &dyn KvStore, persistent_id: &str) -> Result<()> {
    store.del(&hashes_key(persistent_id)).await
}

/// Record that a node's remote-side state changed.
pub async fn set_marker(
    store: &dyn KvStore,
    persistent_id: &str,
    node_id: &str,
    marker: Marker,
) -> Result<()> {
    let value = match marker {
        Marker::Written => MARKER_WRITTEN,
        Marker::Deleted => MARKER_DELETED,
    };
    store.set(&marker_key(persistent_id, node_id), value).await
}

/// Consume (read and delete) a node's marker, if any.
pub async fn take_marker(store: &dyn KvStore, persistent_id: &str, node_id: &str) -> Option<Marker> {
    let key = marker_key(persistent_id, node_id);
    let value = match store.get(&key).await {
        Ok(Some(v)) => v,
        Ok(None) => return None,
        Err(e) => {
            warn!(persistent_id, node_id, error = %e, "marker read failed");
            return None;
        }
    };
    if let Err(e) = store.del(&key).await {
        warn!(persistent_id, node_id, error = %e, "marker delete failed");
    }
    match value.as_str() {
        MARKER_WRITTEN => Some(Marker::Written),
        MARKER_DELETED => Some(Marker::Deleted),
        _ => None,
    }
}
