//! ferry-core: Synchronization engine for mirroring a source-repository
//! file tree into a research-data repository dataset.
//!
//! This crate provides:
//! - Tree model and comparator (actions per node, heterogeneous hashes)
//! - Multi-hash streaming reader
//! - Pluggable storage backends (indirect deposit, local files, S3)
//! - Per-dataset hash cache in a shared key-value store
//! - Durable job queue with per-dataset exclusion and a worker pool
//! - Dataset-repository and source-plugin contracts
//! - Logging and configuration

pub mod cache;
pub mod compare;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod hash;
pub mod job;
pub mod kv;
pub mod logging;
pub mod plugin;
pub mod storage;
pub mod tree;

pub use engine::{Engine, Shutdown, ShutdownHandle};
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
