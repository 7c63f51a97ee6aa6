//! Source plugin whose stream specs embed the file bytes directly.
//!
//! Useful for end-to-end tests: a node's stream record is simply
//! `{"content": "<utf-8 bytes>"}`, so no external service is involved.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use ferry_core::error::{Error, Result};
use ferry_core::hash::{HashKind, Hasher};
use ferry_core::plugin::{CompareRequest, SourcePlugin};
use ferry_core::tree::{Attributes, Checksum, DataFile, FileMetadata, Node};

/// In-memory source tree served through the plugin contract.
#[derive(Default)]
pub struct InlinePlugin {
    nodes: Mutex<HashMap<String, Node>>,
}

impl InlinePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the source tree returned by `query`.
    pub fn set_nodes(&self, nodes: HashMap<String, Node>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    /// Build a source node for `path` with the given content, hashed under
    /// `remote_kind` the way a source repository would report it.
    pub fn source_node(path: &str, content: &str, remote_kind: HashKind) -> Node {
        let (directory, filename) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (String::new(), path.to_string()),
        };
        let mut hasher = Hasher::new(remote_kind, content.len() as u64);
        hasher.update(content.as_bytes());
        let remote_hash = hasher.digest();

        Node {
            id: path.to_string(),
            name: filename.clone(),
            path: directory.clone(),
            attributes: Attributes {
                parent_id: directory.clone(),
                is_file: true,
                remote_hash: remote_hash.clone(),
                remote_hash_type: remote_kind.as_str().to_string(),
                metadata: FileMetadata {
                    label: filename.clone(),
                    directory_label: directory,
                    data_file: DataFile {
                        filename,
                        content_type: "application/octet-stream".into(),
                        filesize: content.len() as u64,
                        checksum: Checksum {
                            kind: remote_kind.as_str().to_string(),
                            value: remote_hash,
                        },
                        ..DataFile::default()
                    },
                },
                ..Attributes::default()
            },
            ..Node::default()
        }
    }

    /// Stream record carrying the bytes inline.
    pub fn stream_spec(content: &str) -> serde_json::Value {
        serde_json::json!({ "content": content })
    }
}

#[async_trait]
impl SourcePlugin for InlinePlugin {
    async fn query(
        &self,
        _request: &CompareRequest,
        _dataset_nodes: HashMap<String, Node>,
    ) -> Result<HashMap<String, Node>> {
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn open_stream(
        &self,
        node_id: &str,
        spec: &serde_json::Value,
        _params: &HashMap<String, String>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let content = spec
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::StreamOpen {
                message: format!("stream record for {node_id} carries no content"),
            })?;
        Ok(Box::new(Cursor::new(content.as_bytes().to_vec())))
    }
}
