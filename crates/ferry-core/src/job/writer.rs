//! Write loop: stream each node into storage and reconcile the dataset.
//!
//! For every writable node the worker either deletes the dataset copy or
//! streams fresh bytes through the hashing reader into the configured
//! backend, updates the hash cache, swaps the repository registration, and
//! leaves a marker for comparators racing this job. Any per-node error
//! aborts the job; whatever was not finished stays in the residual.

use std::collections::HashMap;

use crate::cache::{self, CalculatedHashes, KnownHashes, Marker};
use crate::constants::{CACHE_FLUSH_EVERY, OCTET_STREAM};
use crate::dataset::{self, AddFileData};
use crate::engine::{Engine, Shutdown};
use crate::error::Result;
use crate::storage::{self, StorageIdentifier};
use crate::tree::{Action, Checksum, Node};

use super::Job;

pub(crate) async fn run(engine: &Engine, shutdown: &Shutdown, mut job: Job) -> (Job, Result<()>) {
    let mut known = match prepare(engine, &mut job).await {
        Ok(known) => known,
        Err(e) => return (job, Err(e)),
    };
    let result = process_nodes(engine, shutdown, &mut job, &mut known).await;
    // Flush whatever was learned, also on the error path.
    cache::store_known_hashes(engine.store.as_ref(), &job.persistent_id, &known).await;
    (job, result)
}

async fn prepare(engine: &Engine, job: &mut Job) -> Result<KnownHashes> {
    storage::trim_persistent_id(&job.persistent_id)?;
    let known = cache::known_hashes(engine.store.as_ref(), &job.persistent_id).await;
    let filtered = filter_redundant(engine, job, &known).await?;
    job.writable_nodes = filtered;
    engine
        .repo
        .check_permission(&job.dataset_key, &job.persistent_id)
        .await?;
    Ok(known)
}

/// Drop actions that became redundant while the job sat in the queue: a
/// stale browser may request writes whose hashes already match, or deletes
/// for files another process has already removed.
async fn filter_redundant(
    engine: &Engine,
    job: &Job,
    known: &KnownHashes,
) -> Result<HashMap<String, Node>> {
    let mut filtered = HashMap::new();
    let mut has_delete = false;
    for (id, node) in &job.writable_nodes {
        if node.action == Action::Delete {
            has_delete = true;
        } else if let Some(cached) = known
            .get(id)
            .and_then(|c| c.remote_hashes.get(&node.attributes.remote_hash_type))
        {
            if *cached == node.attributes.remote_hash {
                continue;
            }
        }
        filtered.insert(id.clone(), node.clone());
    }
    if !has_delete {
        return Ok(filtered);
    }

    let listing = engine
        .repo
        .list_files(&job.dataset_key, &job.persistent_id)
        .await?;
    let current = dataset::listing_ids(&listing);
    filtered.retain(|id, node| !(node.action == Action::Delete && !current.contains_key(id)));
    Ok(filtered)
}

async fn process_nodes(
    engine: &Engine,
    shutdown: &Shutdown,
    job: &mut Job,
    known: &mut KnownHashes,
) -> Result<()> {
    let plugin = engine.plugins.get(&job.stream_kind)?;
    let store = engine.store.as_ref();
    let token = job.dataset_key.clone();
    let persistent_id = job.persistent_id.clone();
    let direct_upload = job
        .stream_params
        .get("directUpload")
        .map(|v| v == "true")
        .unwrap_or(engine.config.direct_upload);

    let ids: Vec<String> = job.writable_nodes.keys().cloned().collect();
    let total = ids.len();
    let mut processed = 0usize;

    for id in ids {
        if shutdown.is_stopped() {
            // Cancellation is not an error; the residual carries on later.
            return Ok(());
        }
        let Some(node) = job.writable_nodes.get(&id).cloned() else {
            continue;
        };

        if node.action == Action::Delete {
            engine
                .repo
                .delete_file(&token, node.attributes.metadata.data_file.id)
                .await?;
            known.remove(&id);
            cache::set_marker(store, &persistent_id, &id, Marker::Deleted).await?;
        } else {
            let identifier = StorageIdentifier::generate(&engine.config);
            let spec = job
                .streams
                .get(&id)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let source = plugin.open_stream(&id, &spec, &job.stream_params).await?;
            let outcome = storage::store_bytes(
                engine,
                &token,
                &persistent_id,
                &identifier,
                &id,
                source,
                &node.attributes.remote_hash_type,
                node.attributes.metadata.data_file.filesize,
                direct_upload,
            )
            .await?;

            // New or updated bytes always refresh the cache entry.
            known.insert(
                id.clone(),
                CalculatedHashes {
                    local_hash_type: engine.config.default_hash.as_str().to_string(),
                    local_hash_value: outcome.local_hash.clone(),
                    remote_hashes: HashMap::from([(
                        node.attributes.remote_hash_type.clone(),
                        outcome.remote_hash.clone(),
                    )]),
                },
            );

            if node.attributes.metadata.data_file.id != 0 {
                engine
                    .repo
                    .delete_file(&token, node.attributes.metadata.data_file.id)
                    .await?;
            }

            let directory_label = &node.attributes.metadata.directory_label;
            engine
                .repo
                .add_file(
                    &token,
                    &persistent_id,
                    AddFileData {
                        storage_identifier: identifier.to_string(),
                        file_name: node.attributes.metadata.data_file.filename.clone(),
                        directory_label: (!directory_label.is_empty())
                            .then(|| directory_label.clone()),
                        mime_type: OCTET_STREAM.to_string(),
                        checksum: Checksum {
                            kind: engine.config.default_hash.as_str().to_string(),
                            value: outcome.local_hash,
                        },
                    },
                )
                .await?;
            cache::set_marker(store, &persistent_id, &id, Marker::Written).await?;
        }

        job.writable_nodes.remove(&id);
        processed += 1;
        if processed % CACHE_FLUSH_EVERY == 0 && processed < total {
            cache::store_known_hashes(store, &persistent_id, known).await;
        }
    }

    if shutdown.is_stopped() {
        return Ok(());
    }
    // A write that landed bytes but failed at registration leaves an
    // orphaned object; the repository collects those here.
    engine.repo.clean_storage(&token, &persistent_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hash::HashKind;
    use ferry_test_utils::{test_context, InlinePlugin};

    fn delete_node(id: i64, path: &str) -> Node {
        let mut node = Node {
            id: path.to_string(),
            name: path.to_string(),
            ..Node::default()
        };
        node.action = Action::Delete;
        node.attributes.metadata.data_file.id = id;
        node.attributes.metadata.data_file.filename = path.to_string();
        node
    }

    #[tokio::test]
    async fn redundant_write_is_filtered() {
        let ctx = test_context(Config::default());
        let mut node = InlinePlugin::source_node("a.txt", "hello", HashKind::Sha1);
        node.action = Action::Update;

        let mut known = KnownHashes::new();
        known.insert(
            "a.txt".into(),
            CalculatedHashes {
                local_hash_type: "md5".into(),
                local_hash_value: "irrelevant".into(),
                remote_hashes: HashMap::from([(
                    "sha1".to_string(),
                    node.attributes.remote_hash.clone(),
                )]),
            },
        );

        let job = Job {
            dataset_key: "key".into(),
            persistent_id: "doi:10.1/X".into(),
            writable_nodes: HashMap::from([("a.txt".to_string(), node)]),
            stream_kind: "inline".into(),
            ..Job::default()
        };
        let filtered = filter_redundant(&ctx.engine, &job, &known).await.unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn stale_delete_is_filtered_against_fresh_listing() {
        let ctx = test_context(Config::default());
        // The file was never seeded, i.e. another process already removed it.
        let job = Job {
            dataset_key: "key".into(),
            persistent_id: "doi:10.1/X".into(),
            writable_nodes: HashMap::from([("b.txt".to_string(), delete_node(42, "b.txt"))]),
            stream_kind: "inline".into(),
            ..Job::default()
        };
        let filtered = filter_redundant(&ctx.engine, &job, &KnownHashes::new())
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn live_delete_survives_filtering() {
        let ctx = test_context(Config::default());
        let id = ctx
            .repo
            .seed_file("", "c.txt", "md5", "aa", "file://f1", b"x");
        let job = Job {
            dataset_key: "key".into(),
            persistent_id: "doi:10.1/X".into(),
            writable_nodes: HashMap::from([("c.txt".to_string(), delete_node(id, "c.txt"))]),
            stream_kind: "inline".into(),
            ..Job::default()
        };
        let filtered = filter_redundant(&ctx.engine, &job, &KnownHashes::new())
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn unknown_driver_fails_the_job() {
        let mut config = Config::default();
        config.default_driver = "ftp".into();
        config.direct_upload = true;
        let ctx = test_context(config);

        let mut node = InlinePlugin::source_node("a.txt", "hello", HashKind::GitHash);
        node.action = Action::New;
        let job = Job {
            dataset_key: "key".into(),
            persistent_id: "doi:10.1/X".into(),
            writable_nodes: HashMap::from([("a.txt".to_string(), node)]),
            stream_kind: "inline".into(),
            streams: HashMap::from([("a.txt".to_string(), InlinePlugin::stream_spec("hello"))]),
            ..Job::default()
        };

        let shutdown = ctx.engine.shutdown.clone();
        let (_, result) = run(&ctx.engine, &shutdown, job).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::UnsupportedDriver(d)) if d == "ftp"
        ));
    }

    #[tokio::test]
    async fn malformed_persistent_id_fails_before_any_node() {
        let ctx = test_context(Config::default());
        let mut node = InlinePlugin::source_node("a.txt", "hello", HashKind::GitHash);
        node.action = Action::New;
        let job = Job {
            dataset_key: "key".into(),
            persistent_id: "noColonHere".into(),
            writable_nodes: HashMap::from([("a.txt".to_string(), node)]),
            stream_kind: "inline".into(),
            streams: HashMap::from([("a.txt".to_string(), InlinePlugin::stream_spec("hello"))]),
            ..Job::default()
        };

        let shutdown = ctx.engine.shutdown.clone();
        let (residual, result) = run(&ctx.engine, &shutdown, job).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::MalformedPersistentId(_))
        ));
        // Nothing was processed and nothing was written.
        assert_eq!(residual.writable_nodes.len(), 1);
        assert!(ctx.repo.files().is_empty());
    }
}
