//! Pluggable storage backends.
//!
//! A storage identifier of the form `driver://[bucket:]filename` ties a
//! node to physical bytes. Writes stream the source through a
//! [`MultiHashReader`](crate::hash::MultiHashReader) into the selected
//! backend, so every hash comes from the one byte sequence that was
//! actually stored. Three modes:
//!
//! - indirect: the bytes travel to the repository's deposit endpoint as a
//!   single-entry ZIP (no direct storage access needed);
//! - `file`: a directory tree below the configured files root;
//! - `s3`: a managed multipart upload to an S3-compatible store.

mod local;
mod s3;
mod sword;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::dataset::ByteSource;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::hash::{Hasher, MultiHashReader};
use crate::tree::Node;

/// Parsed form of `driver://[bucket:]filename`.
///
/// Parsing is lenient, mirroring how identifiers circulate as opaque
/// strings; an unknown or empty driver only fails when a backend is
/// actually selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageIdentifier {
    pub driver: String,
    pub bucket: String,
    pub filename: String,
}

impl StorageIdentifier {
    /// Parse an identifier string.
    pub fn parse(raw: &str) -> Self {
        let Some((driver, rest)) = raw.split_once("://") else {
            return Self::default();
        };
        let (bucket, filename) = match rest.split_once(':') {
            Some((bucket, filename)) => (bucket.to_string(), filename.to_string()),
            None => (String::new(), rest.to_string()),
        };
        Self {
            driver: driver.to_string(),
            bucket,
            filename,
        }
    }

    /// Generate a fresh identifier under the configured default driver.
    pub fn generate(config: &Config) -> Self {
        let bucket = if config.default_driver == "s3" {
            config.s3.bucket.clone()
        } else {
            String::new()
        };
        Self {
            driver: config.default_driver.clone(),
            bucket,
            filename: generate_filename(),
        }
    }
}

impl fmt::Display for StorageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket.is_empty() {
            write!(f, "{}://{}", self.driver, self.filename)
        } else {
            write!(f, "{}://{}:{}", self.driver, self.bucket, self.filename)
        }
    }
}

/// Generate a filename unique within a dataset:
/// `hex(unixMillis)-hex(6 random bytes)`.
pub fn generate_filename() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let random: [u8; 6] = rand::random();
    format!("{millis:x}-{}", hex::encode(random))
}

/// Strip the scheme from a persistent id: `doi:10.5072/FK2/ABC` →
/// `10.5072/FK2/ABC`. The remainder is used verbatim as a path component.
pub fn trim_persistent_id(persistent_id: &str) -> Result<String> {
    match persistent_id.split_once(':') {
        Some((_, rest)) => Ok(rest.to_string()),
        None => Err(Error::MalformedPersistentId(persistent_id.to_string())),
    }
}

/// Hashes and size of a completed write, all from a single pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Digest in the dataset's configured hash kind.
    pub local_hash: String,
    /// Digest in the source repository's hash kind.
    pub remote_hash: String,
    /// Bytes stored.
    pub size: u64,
}

/// Stream `source` into the backend selected by `identifier`, computing
/// the local and remote digests and the byte count on the way through.
#[allow(clippy::too_many_arguments)]
pub async fn store_bytes(
    engine: &Engine,
    dataset_key: &str,
    persistent_id: &str,
    identifier: &StorageIdentifier,
    node_id: &str,
    source: ByteSource,
    remote_hash_kind: &str,
    expected_size: u64,
    direct_upload: bool,
) -> Result<WriteOutcome> {
    let trimmed = trim_persistent_id(persistent_id)?;
    let config = &engine.config;

    let hashers = vec![
        Hasher::new(config.default_hash, expected_size),
        Hasher::for_kind(remote_hash_kind, expected_size)?,
    ];
    let mut reader = MultiHashReader::new(source, hashers);

    if !direct_upload || config.default_driver.is_empty() {
        sword::deposit(engine, dataset_key, persistent_id, node_id, &mut reader).await?;
    } else {
        match identifier.driver.as_str() {
            "file" => {
                local::write(&config.files_dir, &trimmed, &identifier.filename, &mut reader).await?
            }
            "s3" => {
                let key = format!("{trimmed}/{}", identifier.filename);
                s3::upload(&config.s3, &identifier.bucket, &key, &mut reader).await?
            }
            other => return Err(Error::UnsupportedDriver(other.to_string())),
        }
    }

    Ok(WriteOutcome {
        local_hash: reader.digest(0),
        remote_hash: reader.digest(1),
        size: reader.bytes_seen(),
    })
}

/// Open a read source for an already stored node, mirroring the write
/// dispatch: indirect mode fetches through the repository's download
/// endpoint, the direct drivers open the stored object itself.
pub async fn open_read_source(
    engine: &Engine,
    dataset_key: &str,
    persistent_id: &str,
    node: &Node,
) -> Result<ByteSource> {
    let trimmed = trim_persistent_id(persistent_id)?;
    let config = &engine.config;
    let data_file = &node.attributes.metadata.data_file;

    if !config.direct_upload || config.default_driver.is_empty() {
        return engine.repo.download_file(dataset_key, data_file.id).await;
    }

    let identifier = StorageIdentifier::parse(&data_file.storage_identifier);
    match identifier.driver.as_str() {
        "file" => local::read(&config.files_dir, &trimmed, &identifier.filename).await,
        "s3" => {
            let key = format!("{trimmed}/{}", identifier.filename);
            s3::read(&config.s3, &identifier.bucket, &key).await
        }
        other => Err(Error::UnsupportedDriver(other.to_string())),
    }
}

/// Compute a stored node's digest in `hash_kind` by streaming it through a
/// hashing reader into a sink. Used by rehash jobs.
pub async fn hash_stored_node(
    engine: &Engine,
    dataset_key: &str,
    persistent_id: &str,
    node: &Node,
    hash_kind: &str,
) -> Result<String> {
    let expected_size = node.attributes.metadata.data_file.filesize;
    let hasher = Hasher::for_kind(hash_kind, expected_size)?;
    let source = open_read_source(engine, dataset_key, persistent_id, node).await?;
    let mut reader = MultiHashReader::new(source, vec![hasher]);
    tokio::io::copy(&mut reader, &mut tokio::io::sink())
        .await
        .map_err(|e| Error::StreamRead {
            message: e.to_string(),
        })?;
    Ok(reader.digest(0))
}
