//! Worker pool and job execution loop.
//!
//! Each worker leases at most one job at a time and processes its nodes
//! sequentially. Every wait is raced against the stop broadcast; a job cut
//! short by it leaves a well-formed residual that is re-enqueued under the
//! lock the worker already holds.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::constants::POLL_INTERVAL;
use crate::engine::Engine;
use crate::error::Result;

use super::{pop, rehash, requeue, unlock, writer, Job};

/// Handles of a running worker pool.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Wait for every worker to exit (they do so after the stop signal).
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    /// Number of workers spawned.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Spawn `count` workers against the engine.
pub fn spawn_workers(engine: Arc<Engine>, count: usize) -> WorkerPool {
    let handles = (0..count)
        .map(|worker_id| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { worker_loop(&engine, worker_id).await })
        })
        .collect();
    WorkerPool { handles }
}

async fn worker_loop(engine: &Engine, worker_id: usize) {
    let mut shutdown = engine.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
        let Some(job) = pop(engine).await else {
            continue;
        };
        let persistent_id = job.persistent_id.clone();
        let (residual, result) = execute(engine, job).await;
        match result {
            Ok(()) if !residual.writable_nodes.is_empty() => {
                if let Err(e) = requeue(engine, &residual).await {
                    error!(persistent_id = %persistent_id, error = %e, "re-adding residual job failed");
                    unlock(engine.store.as_ref(), &persistent_id).await;
                }
            }
            Ok(()) => unlock(engine.store.as_ref(), &persistent_id).await,
            Err(e) => {
                error!(worker_id, "job failed: {persistent_id}: {e}");
                unlock(engine.store.as_ref(), &persistent_id).await;
            }
        }
    }
    info!(worker_id, "worker exited gracefully");
}

/// Execute one leased job to completion, cancellation, or error.
///
/// Returns the job with its residual `writable_nodes` alongside the
/// outcome; cancellation is not an error, it just leaves the residual
/// non-empty.
pub(crate) async fn execute(engine: &Engine, job: Job) -> (Job, Result<()>) {
    // The per-job cancellation scope is an observer of the stop broadcast;
    // both loops check it before every node.
    let shutdown = engine.shutdown.clone();
    if job.is_hash_only() {
        rehash::run(engine, &shutdown, job).await
    } else {
        writer::run(engine, &shutdown, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::constants::JOBS_QUEUE;
    use crate::hash::HashKind;
    use crate::job::enqueue;
    use crate::tree::Action;
    use ferry_test_utils::{test_context, InlinePlugin, MemoryKv};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Jump past the worker's poll ticks, then give real time for I/O.
    async fn drain_queue(store: &MemoryKv, lock_key: &str) {
        for _ in 0..100 {
            tokio::time::pause();
            tokio::time::advance(POLL_INTERVAL + Duration::from_secs(1)).await;
            tokio::time::resume();
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.list_len(JOBS_QUEUE) == 0 && !store.contains(lock_key) {
                return;
            }
        }
        panic!("job queue did not drain");
    }

    #[tokio::test]
    async fn workers_drain_the_queue_and_release_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.files_dir = dir.path().to_path_buf();
        config.direct_upload = true;
        let ctx = test_context(config);

        let mut node = InlinePlugin::source_node("a.txt", "hello", HashKind::GitHash);
        node.action = Action::New;
        let job = Job {
            dataset_key: "key".into(),
            persistent_id: "doi:10.5072/FK2/ABC".into(),
            writable_nodes: HashMap::from([("a.txt".to_string(), node)]),
            stream_kind: "inline".into(),
            streams: HashMap::from([(
                "a.txt".to_string(),
                InlinePlugin::stream_spec("hello"),
            )]),
            ..Job::default()
        };
        enqueue(&ctx.engine, job).await.unwrap();

        let pool = spawn_workers(Arc::new(ctx.engine.clone()), 1);
        assert_eq!(pool.len(), 1);
        drain_queue(&ctx.store, "lock:doi:10.5072/FK2/ABC").await;

        assert!(ctx.repo.find_file("", "a.txt").is_some());

        ctx.shutdown_handle.stop();
        pool.join().await;
    }

    #[tokio::test]
    async fn stop_signal_ends_idle_workers() {
        let ctx = test_context(Config::default());
        let pool = spawn_workers(Arc::new(ctx.engine.clone()), 3);
        ctx.shutdown_handle.stop();
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .expect("workers must exit on stop");
    }
}
