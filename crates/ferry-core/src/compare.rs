//! Tree comparison.
//!
//! Reconciles the dataset's current tree with the source repository's tree
//! under heterogeneous hash algorithms. Each node of the merged tree gets
//! its local hash translated into the remote algorithm (via writer
//! markers, the checksum-kind shortcut, or the hash cache) and an action.
//! Cache misses never block: the affected nodes are handed to a background
//! `hash-only` job and the comparator answers with `?` until a later poll
//! finds the cache filled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{self, Marker};
use crate::constants::{COMPARE_TIMEOUT, RESPONSE_PREFIX, RESPONSE_TTL, STREAM_KIND_HASH_ONLY};
use crate::engine::Engine;
use crate::error::Result;
use crate::job::{self, Job};
use crate::kv::KvStore;
use crate::plugin::CompareRequest;
use crate::tree::{self, Action, Node};

/// Outcome of a compare operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompareResponse {
    /// Merged tree, sorted by node id, each node annotated with an action.
    pub nodes: Vec<Node>,
    /// Whether any node is waiting on a background rehash.
    pub some_cache_misses: bool,
    /// The size cutoff that was applied (0 = none).
    pub max_file_size: u64,
    /// Source entries excluded by the cutoff.
    pub too_large: Vec<String>,
}

/// Per-request cached response polled by clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CachedResponse {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CompareResponse>,
    pub error_message: String,
}

/// Kick off a compare in the background; returns the key under which the
/// result will appear.
///
/// Fails with `cacheUnavailable` when the shared store does not answer,
/// since without it there is nowhere to put the response.
pub async fn submit_compare(engine: &Engine, request: CompareRequest) -> Result<String> {
    engine.store.ping().await?;
    let key = Uuid::new_v4().to_string();
    let engine = engine.clone();
    let response_key = key.clone();
    tokio::spawn(async move {
        run_compare(&engine, request, &response_key).await;
    });
    Ok(key)
}

/// Run a compare to completion and store the outcome under `key`.
pub async fn run_compare(engine: &Engine, request: CompareRequest, key: &str) {
    let persistent_id = request.persistent_id.clone();
    let cached = match tokio::time::timeout(COMPARE_TIMEOUT, do_compare(engine, &request)).await {
        Ok(Ok(response)) => CachedResponse {
            key: key.to_string(),
            response: Some(response),
            error_message: String::new(),
        },
        Ok(Err(e)) => {
            warn!(persistent_id = %persistent_id, error = %e, "compare failed");
            CachedResponse {
                key: key.to_string(),
                response: None,
                error_message: e.to_string(),
            }
        }
        Err(_) => CachedResponse {
            key: key.to_string(),
            response: None,
            error_message: format!(
                "comparison timed out after {}s",
                COMPARE_TIMEOUT.as_secs()
            ),
        },
    };
    store_response(engine.store.as_ref(), &cached).await;
}

/// Fetch a previously stored response, if it is ready.
pub async fn cached_response(store: &dyn KvStore, key: &str) -> Result<Option<CachedResponse>> {
    match store.get(&format!("{RESPONSE_PREFIX}{key}")).await? {
        Some(raw) => Ok(serde_json::from_str(&raw).ok()),
        None => Ok(None),
    }
}

async fn store_response(store: &dyn KvStore, cached: &CachedResponse) {
    let raw = match serde_json::to_string(cached) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key = cached.key.as_str(), error = %e, "serializing response failed");
            return;
        }
    };
    let key = format!("{RESPONSE_PREFIX}{}", cached.key);
    if let Err(e) = store.set_ex(&key, &raw, RESPONSE_TTL).await {
        warn!(key = cached.key.as_str(), error = %e, "storing response failed");
    }
}

async fn do_compare(engine: &Engine, request: &CompareRequest) -> Result<CompareResponse> {
    engine
        .repo
        .check_permission(&request.dataset_key, &request.persistent_id)
        .await?;

    let listing = engine
        .repo
        .list_files(&request.dataset_key, &request.persistent_id)
        .await?;
    let dataset_nodes = tree::node_map_from_listing(listing);

    let plugin = engine.plugins.get(&request.plugin)?;
    let mut source_nodes = plugin.query(request, dataset_nodes.clone()).await?;

    let max_file_size = engine.config.max_file_size;
    let mut too_large = Vec::new();
    if max_file_size > 0 {
        source_nodes.retain(|_, node| {
            if node.attributes.metadata.data_file.filesize > max_file_size {
                too_large.push(node.id.clone());
                false
            } else {
                true
            }
        });
        too_large.sort();
    }

    let mut merged = tree::merge_node_maps(dataset_nodes, source_nodes);
    let some_cache_misses = translate_local_hashes(engine, request, &mut merged, true).await;
    assign_actions(&mut merged);

    let mut nodes: Vec<Node> = merged.into_values().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(CompareResponse {
        nodes,
        some_cache_misses,
        max_file_size,
        too_large,
    })
}

/// How the authoritative local hash of one node was determined.
enum Resolution {
    Value(String),
    Absent,
    Miss,
}

/// Translate each node's local hash into the remote algorithm.
///
/// Precedence per node: writer marker, then the checksum-kind shortcut,
/// then a fresh cache entry, else a rehash is needed. Returns whether any
/// node was left waiting on a rehash; with `enqueue` set, those nodes are
/// handed to a `hash-only` job.
pub(crate) async fn translate_local_hashes(
    engine: &Engine,
    request: &CompareRequest,
    nodes: &mut HashMap<String, Node>,
    enqueue: bool,
) -> bool {
    let store = engine.store.as_ref();
    let persistent_id = &request.persistent_id;
    let known = cache::known_hashes(store, persistent_id).await;
    let mut job_nodes: HashMap<String, Node> = HashMap::new();

    for (id, node) in nodes.iter_mut() {
        let kind = node.attributes.remote_hash_type.clone();
        if kind.is_empty() {
            continue;
        }
        let checksum = &node.attributes.metadata.data_file.checksum;
        let has_dataset_copy = !node.attributes.local_hash.is_empty();

        let resolution = match cache::take_marker(store, persistent_id, id).await {
            Some(Marker::Written) => Resolution::Value(node.attributes.remote_hash.clone()),
            Some(Marker::Deleted) => Resolution::Absent,
            None => {
                if has_dataset_copy && checksum.kind == kind {
                    Resolution::Value(checksum.value.clone())
                } else if let Some(value) = known
                    .get(id)
                    // A cache entry is only authoritative while the stored
                    // checksum it was computed against is still current.
                    .filter(|c| {
                        c.local_hash_type == checksum.kind && c.local_hash_value == checksum.value
                    })
                    .and_then(|c| c.remote_hashes.get(&kind))
                {
                    Resolution::Value(value.clone())
                } else {
                    Resolution::Miss
                }
            }
        };

        match resolution {
            Resolution::Value(value) => node.attributes.local_hash = value,
            Resolution::Absent => node.attributes.local_hash = String::new(),
            Resolution::Miss => {
                if has_dataset_copy {
                    node.attributes.local_hash = "?".to_string();
                    job_nodes.insert(id.clone(), node.clone());
                } else {
                    // Source-only node: there is nothing stored to rehash.
                    node.attributes.local_hash = String::new();
                }
            }
        }
    }

    let some_misses = !job_nodes.is_empty();
    if some_misses && enqueue {
        let job = Job {
            dataset_key: request.dataset_key.clone(),
            persistent_id: request.persistent_id.clone(),
            writable_nodes: job_nodes,
            stream_kind: STREAM_KIND_HASH_ONLY.to_string(),
            ..Job::default()
        };
        if let Err(e) = job::enqueue(engine, job).await {
            // Usually the dataset lock; the next poll enqueues again.
            debug!(persistent_id = %request.persistent_id, error = %e, "rehash job not enqueued");
        }
    }
    some_misses
}

/// Assign an action to every node of the merged tree.
pub(crate) fn assign_actions(nodes: &mut HashMap<String, Node>) {
    for node in nodes.values_mut() {
        let has_dataset = node.has_dataset_file();
        let has_source = node.has_source_entry();
        node.action = match (has_dataset, has_source) {
            (false, true) => Action::New,
            (true, false) => Action::Delete,
            (true, true) => {
                let local = &node.attributes.local_hash;
                if local == "?" || local.is_empty() {
                    Action::Unknown
                } else if *local == node.attributes.remote_hash {
                    Action::Equal
                } else {
                    Action::Update
                }
            }
            (false, false) => Action::Unknown,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::hash::HashKind;
    use ferry_test_utils::{test_context, InlinePlugin};

    fn request() -> CompareRequest {
        CompareRequest {
            plugin: "inline".into(),
            persistent_id: "doi:10.5072/FK2/ABC".into(),
            dataset_key: "key".into(),
            ..CompareRequest::default()
        }
    }

    fn md5_of(content: &str) -> String {
        let mut h = crate::hash::Hasher::new(HashKind::Md5, 0);
        h.update(content.as_bytes());
        h.digest()
    }

    #[tokio::test]
    async fn fresh_source_file_is_new() {
        let ctx = test_context(Config::default());
        ctx.plugin.set_nodes(
            [(
                "a.txt".to_string(),
                InlinePlugin::source_node("a.txt", "hello", HashKind::GitHash),
            )]
            .into(),
        );

        let response = do_compare(&ctx.engine, &request()).await.unwrap();
        assert_eq!(response.nodes.len(), 1);
        assert_eq!(response.nodes[0].action, Action::New);
        assert!(!response.some_cache_misses);
    }

    #[tokio::test]
    async fn dataset_only_file_is_delete() {
        let ctx = test_context(Config::default());
        ctx.repo
            .seed_file("", "b.txt", "md5", &md5_of("old"), "file://f1", b"old");

        let response = do_compare(&ctx.engine, &request()).await.unwrap();
        assert_eq!(response.nodes.len(), 1);
        assert_eq!(response.nodes[0].action, Action::Delete);
    }

    #[tokio::test]
    async fn matching_checksum_kind_is_equal_without_cache() {
        let ctx = test_context(Config::default());
        // Dataset checksum kind equals the remote kind, so no translation
        // or rehash is needed.
        let value = md5_of("same");
        ctx.repo
            .seed_file("", "c.txt", "md5", &value, "file://f2", b"same");
        ctx.plugin.set_nodes(
            [(
                "c.txt".to_string(),
                InlinePlugin::source_node("c.txt", "same", HashKind::Md5),
            )]
            .into(),
        );

        let response = do_compare(&ctx.engine, &request()).await.unwrap();
        assert_eq!(response.nodes[0].action, Action::Equal);
        assert!(!response.some_cache_misses);
        // Nothing was queued.
        assert_eq!(ctx.store.list_len("jobs"), 0);
    }

    #[tokio::test]
    async fn heterogeneous_kinds_enqueue_rehash() {
        let ctx = test_context(Config::default());
        ctx.repo
            .seed_file("", "d.txt", "md5", &md5_of("data"), "file://f3", b"data");
        ctx.plugin.set_nodes(
            [(
                "d.txt".to_string(),
                InlinePlugin::source_node("d.txt", "data", HashKind::Sha1),
            )]
            .into(),
        );

        let response = do_compare(&ctx.engine, &request()).await.unwrap();
        assert!(response.some_cache_misses);
        assert_eq!(response.nodes[0].action, Action::Unknown);
        assert_eq!(response.nodes[0].attributes.local_hash, "?");
        // A hash-only job is waiting and the dataset is locked.
        assert_eq!(ctx.store.list_len("jobs"), 1);
        assert!(ctx.store.contains("lock:doi:10.5072/FK2/ABC"));
    }

    #[tokio::test]
    async fn written_marker_short_circuits() {
        let ctx = test_context(Config::default());
        ctx.repo
            .seed_file("", "e.txt", "md5", &md5_of("new"), "file://f4", b"new");
        let node = InlinePlugin::source_node("e.txt", "new", HashKind::Sha1);
        let remote = node.attributes.remote_hash.clone();
        ctx.plugin.set_nodes([("e.txt".to_string(), node)].into());

        cache::set_marker(ctx.store.as_ref(), "doi:10.5072/FK2/ABC", "e.txt", Marker::Written)
            .await
            .unwrap();

        let response = do_compare(&ctx.engine, &request()).await.unwrap();
        assert_eq!(response.nodes[0].attributes.local_hash, remote);
        assert_eq!(response.nodes[0].action, Action::Equal);
        // The marker was consumed; a second compare goes through the cache.
        assert!(!ctx.store.contains("doi:10.5072/FK2/ABC -> e.txt"));
    }

    #[tokio::test]
    async fn oversized_source_entries_are_reported() {
        let mut config = Config::default();
        config.max_file_size = 3;
        let ctx = test_context(config);
        ctx.plugin.set_nodes(
            [
                (
                    "small.txt".to_string(),
                    InlinePlugin::source_node("small.txt", "ok", HashKind::GitHash),
                ),
                (
                    "big.txt".to_string(),
                    InlinePlugin::source_node("big.txt", "too large", HashKind::GitHash),
                ),
            ]
            .into(),
        );

        let response = do_compare(&ctx.engine, &request()).await.unwrap();
        assert_eq!(response.too_large, vec!["big.txt".to_string()]);
        assert_eq!(response.nodes.len(), 1);
        assert_eq!(response.nodes[0].id, "small.txt");
        assert_eq!(response.max_file_size, 3);
    }

    #[tokio::test]
    async fn permission_denied_surfaces() {
        let ctx = test_context(Config::default());
        ctx.repo.set_permissions(vec![]);
        let err = do_compare(&ctx.engine, &request()).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn submit_requires_the_store() {
        let ctx = test_context(Config::default());
        ctx.store.set_unavailable(true);
        let err = submit_compare(&ctx.engine, request()).await.unwrap_err();
        assert!(matches!(err, Error::CacheUnavailable { .. }));
    }

    #[tokio::test]
    async fn response_roundtrip_through_store() {
        let ctx = test_context(Config::default());
        let cached = CachedResponse {
            key: "k1".into(),
            response: Some(CompareResponse::default()),
            error_message: String::new(),
        };
        store_response(ctx.store.as_ref(), &cached).await;
        let loaded = cached_response(ctx.store.as_ref(), "k1").await.unwrap();
        assert_eq!(loaded, Some(cached));
        assert_eq!(
            cached_response(ctx.store.as_ref(), "missing").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn compare_twice_is_deterministic() {
        let ctx = test_context(Config::default());
        let value = md5_of("stable");
        ctx.repo
            .seed_file("docs", "s.txt", "md5", &value, "file://f5", b"stable");
        ctx.plugin.set_nodes(
            [(
                "docs/s.txt".to_string(),
                InlinePlugin::source_node("docs/s.txt", "stable", HashKind::Md5),
            )]
            .into(),
        );

        let first = do_compare(&ctx.engine, &request()).await.unwrap();
        let second = do_compare(&ctx.engine, &request()).await.unwrap();
        let actions = |r: &CompareResponse| {
            r.nodes
                .iter()
                .map(|n| (n.id.clone(), n.action))
                .collect::<Vec<_>>()
        };
        assert_eq!(actions(&first), actions(&second));
    }
}
