//! Source-repository plugin contract.
//!
//! A plugin answers exactly two questions: what does the source tree look
//! like (`query`), and how do I read one file's bytes (`open_stream`).
//! Comparison, hashing, storage, and registration are the engine's job.
//! Jobs reference plugins by their registered stream kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::tree::Node;

/// A compare request as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompareRequest {
    /// Registered plugin name; also the stream kind of resulting write jobs.
    pub plugin: String,
    /// Source repository coordinates, e.g. `owner/repo`.
    pub repo_name: String,
    /// Branch, tag, or tree reference inside the source repository.
    pub reference: String,
    /// Source-repository access token.
    pub token: String,
    /// Dataset-repository API token.
    pub dataset_key: String,
    /// Persistent id of the target dataset.
    pub persistent_id: String,
}

/// A source repository reduced to its two consumed operations.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Query the source tree.
    ///
    /// Every returned node must carry `remoteHashType` and `remoteHash`.
    /// `dataset_nodes` is a copy of the dataset's current tree for plugins
    /// that can skip unchanged subtrees.
    async fn query(
        &self,
        request: &CompareRequest,
        dataset_nodes: HashMap<String, Node>,
    ) -> Result<HashMap<String, Node>>;

    /// Open the byte stream for one node of a write job.
    ///
    /// `spec` is the plugin-opaque stream record the job carries per node;
    /// `params` are the job-wide stream parameters.
    async fn open_stream(
        &self,
        node_id: &str,
        spec: &serde_json::Value,
        params: &HashMap<String, String>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Registry mapping stream kinds to plugins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn SourcePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under `kind`; replaces any previous registration.
    pub fn register(&mut self, kind: impl Into<String>, plugin: Arc<dyn SourcePlugin>) {
        self.plugins.insert(kind.into(), plugin);
    }

    /// Look up the plugin for `kind`.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn SourcePlugin>> {
        self.plugins
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::StreamOpen {
                message: format!("no plugin registered for stream kind {kind}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullPlugin;

    #[async_trait]
    impl SourcePlugin for NullPlugin {
        async fn query(
            &self,
            _request: &CompareRequest,
            _dataset_nodes: HashMap<String, Node>,
        ) -> Result<HashMap<String, Node>> {
            Ok(HashMap::new())
        }

        async fn open_stream(
            &self,
            node_id: &str,
            _spec: &serde_json::Value,
            _params: &HashMap<String, String>,
        ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
            Err(Error::StreamOpen {
                message: format!("no bytes for {node_id}"),
            })
        }
    }

    #[test]
    fn lookup_unknown_kind_fails() {
        let registry = PluginRegistry::new();
        assert!(registry.get("github").is_err());
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register("null", Arc::new(NullPlugin));
        assert!(registry.get("null").is_ok());
    }

    #[test]
    fn request_deserializes_camel_case() {
        let raw = r#"{"plugin":"github","repoName":"o/r","reference":"main","persistentId":"doi:10.1/X","datasetKey":"k"}"#;
        let req: CompareRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.repo_name, "o/r");
        assert_eq!(req.persistent_id, "doi:10.1/X");
    }
}
