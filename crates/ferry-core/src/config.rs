//! Process configuration with environment overrides.
//!
//! Every field has a default suitable for local development and can be
//! overridden from the process environment. The configuration is read once
//! at startup and carried inside the engine context; nothing re-reads the
//! environment afterwards.

use std::path::PathBuf;

use crate::hash::HashKind;

/// S3 backend parameters.
///
/// Credentials are not configured here: the SDK reads
/// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` from the environment.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Region passed to the SDK.
    pub region: String,
    /// Custom endpoint URL; empty uses the SDK default.
    pub endpoint: String,
    /// Use path-style addressing (needed by most S3-compatible stores).
    pub path_style: bool,
    /// Bucket written into generated storage identifiers.
    pub bucket: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            endpoint: String::new(),
            path_style: false,
            bucket: "datasets".into(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for `file`-driver storage.
    pub files_dir: PathBuf,
    /// Base URL of the dataset repository.
    pub dataset_server: String,
    /// `file`, `s3`, or empty (forces indirect upload).
    pub default_driver: String,
    /// Process-wide default for direct upload; requests may override it.
    pub direct_upload: bool,
    /// S3 backend parameters.
    pub s3: S3Config,
    /// Hash kind stored as the dataset's local checksum.
    pub default_hash: HashKind,
    /// Files larger than this are excluded from compare results (0 = unlimited).
    pub max_file_size: u64,
    /// Worker-pool size (0 = no workers).
    pub num_workers: usize,
    /// Shared key-value store connection URL.
    pub redis_url: String,
    /// Key unlocking the repository's admin permission endpoint.
    pub unblock_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            files_dir: PathBuf::from("data/files"),
            dataset_server: "http://localhost:7000".into(),
            default_driver: "file".into(),
            direct_upload: false,
            s3: S3Config::default(),
            default_hash: HashKind::Md5,
            max_file_size: 0,
            num_workers: 0,
            redis_url: "redis://localhost:6379".into(),
            unblock_key: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using an arbitrary variable lookup.
    ///
    /// Unset or unparsable variables leave the default in place.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = nonempty(&lookup, "FILES_PATH") {
            cfg.files_dir = PathBuf::from(v);
        }
        if let Some(v) = nonempty(&lookup, "DATASET_SERVER") {
            cfg.dataset_server = v;
        }
        if let Some(v) = lookup("STORAGE_DRIVER") {
            cfg.default_driver = v.trim().to_string();
        }
        if let Some(v) = nonempty(&lookup, "DIRECT_UPLOAD") {
            cfg.direct_upload = parse_flag(&v);
        }
        if let Some(v) = nonempty(&lookup, "AWS_REGION") {
            cfg.s3.region = v;
        }
        if let Some(v) = nonempty(&lookup, "AWS_ENDPOINT") {
            cfg.s3.endpoint = v;
        }
        if let Some(v) = nonempty(&lookup, "AWS_PATH_STYLE_ACCESS") {
            cfg.s3.path_style = parse_flag(&v);
        }
        if let Some(v) = nonempty(&lookup, "AWS_BUCKET") {
            cfg.s3.bucket = v;
        }
        if let Some(v) = nonempty(&lookup, "HASH_TYPE") {
            if let Ok(kind) = v.parse::<HashKind>() {
                cfg.default_hash = kind;
            }
        }
        if let Some(v) = nonempty(&lookup, "MAX_FILE_SIZE") {
            if let Ok(n) = v.parse::<u64>() {
                cfg.max_file_size = n;
            }
        }
        if let Some(v) = nonempty(&lookup, "NUM_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.num_workers = n;
            }
        }
        if let Some(v) = nonempty(&lookup, "REDIS_URL") {
            cfg.redis_url = v;
        }
        if let Some(v) = nonempty(&lookup, "UNBLOCK_KEY") {
            cfg.unblock_key = v;
        }
        cfg
    }
}

fn nonempty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

/// Parse a boolean-ish environment value; container platforms quote these.
fn parse_flag(value: &str) -> bool {
    value.trim().trim_matches('"').eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.default_driver, "file");
        assert_eq!(cfg.default_hash, HashKind::Md5);
        assert_eq!(cfg.max_file_size, 0);
        assert_eq!(cfg.num_workers, 0);
        assert!(!cfg.direct_upload);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FILES_PATH", "/srv/files"),
            ("DATASET_SERVER", "https://data.example.org"),
            ("STORAGE_DRIVER", "s3"),
            ("DIRECT_UPLOAD", "\"TRUE\""),
            ("AWS_BUCKET", "archive"),
            ("AWS_PATH_STYLE_ACCESS", "true"),
            ("HASH_TYPE", "sha1"),
            ("MAX_FILE_SIZE", "1048576"),
            ("NUM_WORKERS", "4"),
        ]
        .into_iter()
        .collect();

        let cfg = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(cfg.files_dir, PathBuf::from("/srv/files"));
        assert_eq!(cfg.dataset_server, "https://data.example.org");
        assert_eq!(cfg.default_driver, "s3");
        assert!(cfg.direct_upload);
        assert_eq!(cfg.s3.bucket, "archive");
        assert!(cfg.s3.path_style);
        assert_eq!(cfg.default_hash, HashKind::Sha1);
        assert_eq!(cfg.max_file_size, 1_048_576);
        assert_eq!(cfg.num_workers, 4);
    }

    #[test]
    fn empty_driver_forces_indirect() {
        let cfg = Config::from_lookup(|name| {
            (name == "STORAGE_DRIVER").then(|| "".to_string())
        });
        assert!(cfg.default_driver.is_empty());
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let cfg = Config::from_lookup(|name| match name {
            "HASH_TYPE" => Some("crc32".into()),
            "NUM_WORKERS" => Some("many".into()),
            _ => None,
        });
        assert_eq!(cfg.default_hash, HashKind::Md5);
        assert_eq!(cfg.num_workers, 0);
    }
}
