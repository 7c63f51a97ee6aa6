//! Timing, layout, and shared-store constants for ferry.

use std::time::Duration;

// =============================================================================
// Shared-store keys
// =============================================================================

/// FIFO list holding serialized job records.
pub const JOBS_QUEUE: &str = "jobs";

/// Prefix for per-dataset hash-cache entries.
pub const HASHES_PREFIX: &str = "hashes:";

/// Prefix for per-dataset mutation locks.
pub const LOCK_PREFIX: &str = "lock:";

/// Prefix for cached compare responses.
pub const RESPONSE_PREFIX: &str = "response:";

/// Marker value: the node's bytes have been accepted remotely.
pub const MARKER_WRITTEN: &str = "written";

/// Marker value: the node has been deleted remotely.
pub const MARKER_DELETED: &str = "deleted";

// =============================================================================
// Timing
// =============================================================================

/// How long a per-dataset lock survives a crashed worker.
pub const LOCK_TTL: Duration = Duration::from_secs(24 * 3600);

/// Worker poll interval between queue reads.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Wall-clock bound on a single compare operation.
pub const COMPARE_TIMEOUT: Duration = Duration::from_secs(120);

/// Expiry for cached compare responses.
pub const RESPONSE_TTL: Duration = Duration::from_secs(3600);

// =============================================================================
// Streaming
// =============================================================================

/// Stream kind of rehash-only jobs (no bytes are written).
pub const STREAM_KIND_HASH_ONLY: &str = "hash-only";

/// Buffer size for streaming copies (64 KiB).
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Part size for managed S3 multipart uploads (8 MiB).
pub const S3_PART_SIZE: usize = 8 * 1024 * 1024;

/// Flush the hash cache after this many processed nodes so a polling UI
/// sees progress during long jobs.
pub const CACHE_FLUSH_EVERY: usize = 10;

/// Content type registered for every synchronized file.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Dataset permission required for any mutation.
pub const EDIT_PERMISSION: &str = "EditDataset";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_outlives_any_reasonable_job() {
        assert!(LOCK_TTL > COMPARE_TIMEOUT);
        assert!(LOCK_TTL > POLL_INTERVAL);
    }

    #[test]
    fn s3_parts_meet_minimum() {
        // S3 rejects non-final parts below 5 MiB.
        assert!(S3_PART_SIZE >= 5 * 1024 * 1024);
    }

    #[test]
    fn marker_values_are_distinct() {
        assert_ne!(MARKER_WRITTEN, MARKER_DELETED);
    }
}
