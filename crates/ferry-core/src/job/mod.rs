//! Durable job queue with per-dataset exclusion.
//!
//! Jobs live as JSON records in the shared store's `jobs` list: pushed at
//! the head, leased from the tail, so the queue is FIFO. Mutation per
//! dataset is serialized by `lock:<persistentId>`, an atomic set-if-absent
//! with a 24-hour TTL as the crash-recovery backstop. A residual
//! re-enqueue from inside a worker keeps the lock it already owns.

pub mod rehash;
pub mod worker;
pub mod writer;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::{JOBS_QUEUE, LOCK_PREFIX, LOCK_TTL, STREAM_KIND_HASH_ONLY};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::kv::KvStore;
use crate::tree::Node;

pub use worker::{spawn_workers, WorkerPool};

/// A unit of work mutating one dataset.
///
/// `writable_nodes` shrinks as a worker makes progress; what remains after
/// an interruption is the residual that gets re-enqueued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub dataset_key: String,
    pub persistent_id: String,
    pub writable_nodes: HashMap<String, Node>,
    /// Plugin name for write jobs, or `hash-only`.
    pub stream_kind: String,
    /// Per-node stream records, opaque to the engine.
    pub streams: HashMap<String, serde_json::Value>,
    /// Job-wide stream parameters.
    pub stream_params: HashMap<String, String>,
}

impl Job {
    /// Whether this job only refreshes the hash cache.
    pub fn is_hash_only(&self) -> bool {
        self.stream_kind == STREAM_KIND_HASH_ONLY
    }
}

fn lock_key(persistent_id: &str) -> String {
    format!("{LOCK_PREFIX}{persistent_id}")
}

/// Try to take the per-dataset lock.
pub(crate) async fn try_lock(store: &dyn KvStore, persistent_id: &str) -> Result<bool> {
    store.set_nx_ex(&lock_key(persistent_id), "1", LOCK_TTL).await
}

/// Release the per-dataset lock. Failures are logged; the TTL bounds the
/// damage of a lost release.
pub(crate) async fn unlock(store: &dyn KvStore, persistent_id: &str) {
    if let Err(e) = store.del(&lock_key(persistent_id)).await {
        warn!(persistent_id, error = %e, "releasing dataset lock failed");
    }
}

/// Enqueue a job, acquiring the dataset lock.
///
/// Empty jobs are dropped without locking. Fails with `datasetBusy` when
/// another job for the dataset is already in flight.
pub async fn enqueue(engine: &Engine, job: Job) -> Result<()> {
    if job.writable_nodes.is_empty() {
        return Ok(());
    }
    if !try_lock(engine.store.as_ref(), &job.persistent_id).await? {
        return Err(Error::DatasetBusy(job.persistent_id.clone()));
    }
    push(engine, &job).await?;
    info!(persistent_id = %job.persistent_id, nodes = job.writable_nodes.len(), "job added");
    Ok(())
}

/// Re-enqueue a residual from inside a worker; the lock is already held.
pub(crate) async fn requeue(engine: &Engine, job: &Job) -> Result<()> {
    push(engine, job).await
}

async fn push(engine: &Engine, job: &Job) -> Result<()> {
    let raw = serde_json::to_string(job)?;
    engine.store.lpush(JOBS_QUEUE, &raw).await
}

/// Lease the next job, if any. Undecodable records are dropped with a log
/// line rather than wedging the queue.
pub(crate) async fn pop(engine: &Engine) -> Option<Job> {
    match engine.store.rpop(JOBS_QUEUE).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(error = %e, "failed to decode a job record");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "reading the job queue failed");
            None
        }
    }
}
