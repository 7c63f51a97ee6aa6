//! Hash-only jobs: refresh the cache's local→remote hash translations.
//!
//! A compare that misses the cache hands the affected nodes to one of
//! these jobs. Each node's stored bytes are streamed through a hashing
//! reader and the digest in the remote algorithm is memoized; nodes whose
//! cache entry is still fresh are skipped.

use tracing::info;

use crate::cache::{self, CalculatedHashes, KnownHashes};
use crate::constants::CACHE_FLUSH_EVERY;
use crate::engine::{Engine, Shutdown};
use crate::error::Result;
use crate::storage;
use crate::tree::Node;

use super::Job;

pub(crate) async fn run(engine: &Engine, shutdown: &Shutdown, mut job: Job) -> (Job, Result<()>) {
    if let Err(e) = storage::trim_persistent_id(&job.persistent_id) {
        return (job, Err(e));
    }
    if let Err(e) = engine
        .repo
        .check_permission(&job.dataset_key, &job.persistent_id)
        .await
    {
        return (job, Err(e));
    }

    let store = engine.store.as_ref();
    let persistent_id = job.persistent_id.clone();
    let mut known = cache::known_hashes(store, &persistent_id).await;

    let ids: Vec<String> = job.writable_nodes.keys().cloned().collect();
    let total = ids.len();
    let mut processed = 0usize;
    let mut result = Ok(());

    for id in ids {
        if shutdown.is_stopped() {
            break;
        }
        let Some(node) = job.writable_nodes.get(&id).cloned() else {
            continue;
        };
        if let Err(e) = refresh_hash(engine, &job.dataset_key, &persistent_id, &node, &mut known).await
        {
            result = Err(e);
            break;
        }
        job.writable_nodes.remove(&id);
        processed += 1;
        if processed % CACHE_FLUSH_EVERY == 0 && processed < total {
            // Long rehashes flush early so a polling UI sees progress.
            cache::store_known_hashes(store, &persistent_id, &known).await;
            info!(persistent_id = %persistent_id, processed, total, "rehash progress");
        }
    }

    cache::store_known_hashes(store, &persistent_id, &known).await;
    (job, result)
}

/// Recompute one node's digest in the remote algorithm unless the cached
/// entry is still valid for the currently stored checksum.
async fn refresh_hash(
    engine: &Engine,
    token: &str,
    persistent_id: &str,
    node: &Node,
    known: &mut KnownHashes,
) -> Result<()> {
    let kind = &node.attributes.remote_hash_type;
    let checksum = &node.attributes.metadata.data_file.checksum;

    let fresh = known.get(&node.id).filter(|entry| {
        entry.local_hash_type == checksum.kind && entry.local_hash_value == checksum.value
    });
    if let Some(entry) = fresh {
        if entry.remote_hashes.contains_key(kind) {
            return Ok(());
        }
    }
    let mut entry = fresh.cloned().unwrap_or_else(|| CalculatedHashes {
        local_hash_type: checksum.kind.clone(),
        local_hash_value: checksum.value.clone(),
        remote_hashes: Default::default(),
    });

    let digest = storage::hash_stored_node(engine, token, persistent_id, node, kind).await?;
    entry.remote_hashes.insert(kind.clone(), digest);
    known.insert(node.id.clone(), entry);
    Ok(())
}
