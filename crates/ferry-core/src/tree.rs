//! File-tree model shared by the dataset repository and source plugins.
//!
//! A [`Node`] is one file entry in either tree. The comparator works on the
//! union of both trees keyed by node id (path relative to the dataset root,
//! including the directory label).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Action assigned to a node by the comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Both copies exist and their hashes match.
    Equal,
    /// Present in the source repository only.
    New,
    /// Both copies exist and their hashes differ.
    Update,
    /// Present in the dataset only.
    Delete,
    /// Local hash not yet known; a rehash job is pending.
    #[default]
    Unknown,
}

/// Stored checksum of a dataset file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checksum {
    /// Hash kind, e.g. `md5`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Lowercase hex value.
    pub value: String,
}

/// The dataset repository's record of a stored file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataFile {
    /// Repository-assigned numeric id; 0 when the file is not yet present.
    pub id: i64,
    pub filename: String,
    pub content_type: String,
    pub filesize: u64,
    pub storage_identifier: String,
    pub checksum: Checksum,
}

/// One entry of the dataset repository's file listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileMetadata {
    pub label: String,
    pub directory_label: String,
    pub data_file: DataFile,
}

/// Per-node attributes carried through comparison and writing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attributes {
    pub parent_id: String,
    pub is_file: bool,
    /// Hash value native to the source repository; empty for dataset-only nodes.
    pub remote_hash: String,
    /// Hash kind native to the source repository; empty for dataset-only nodes.
    pub remote_hash_type: String,
    /// Value in the remote kind for the dataset copy, filled by the comparator
    /// (`?` while a rehash job is pending).
    pub local_hash: String,
    pub metadata: FileMetadata,
}

/// A file entry in the merged tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Node {
    /// Stable id: `directoryLabel/filename`.
    pub id: String,
    pub name: String,
    pub path: String,
    pub action: Action,
    pub attributes: Attributes,
}

impl Node {
    /// Whether the dataset repository already holds a copy of this file.
    pub fn has_dataset_file(&self) -> bool {
        self.attributes.metadata.data_file.id != 0
    }

    /// Whether the source repository holds this file.
    pub fn has_source_entry(&self) -> bool {
        !self.attributes.remote_hash.is_empty()
    }
}

/// Node id for a file under an optional directory label.
pub fn node_id(directory_label: &str, filename: &str) -> String {
    if directory_label.is_empty() {
        filename.to_string()
    } else {
        format!("{directory_label}/{filename}")
    }
}

/// Build the dataset-side tree from a repository file listing.
///
/// The node's `localHash` starts as the stored checksum value; the
/// comparator later replaces it with the value in the remote kind.
pub fn node_map_from_listing(listing: Vec<FileMetadata>) -> HashMap<String, Node> {
    let mut map = HashMap::with_capacity(listing.len());
    for meta in listing {
        let id = node_id(&meta.directory_label, &meta.data_file.filename);
        let node = Node {
            id: id.clone(),
            name: meta.data_file.filename.clone(),
            path: meta.directory_label.clone(),
            action: Action::Unknown,
            attributes: Attributes {
                parent_id: meta.directory_label.clone(),
                is_file: true,
                local_hash: meta.data_file.checksum.value.clone(),
                metadata: meta,
                ..Attributes::default()
            },
        };
        map.insert(id, node);
    }
    map
}

/// Union of the dataset tree and the source tree, keyed by node id.
///
/// For ids present on both sides the source node wins (its filename,
/// filesize, and remote hash describe the desired state) but adopts the
/// stored copy's identity: numeric id, checksum, storage identifier, and
/// the dataset-side local hash.
pub fn merge_node_maps(
    dataset: HashMap<String, Node>,
    source: HashMap<String, Node>,
) -> HashMap<String, Node> {
    let mut merged = dataset;
    for (id, mut node) in source {
        if let Some(existing) = merged.get(&id) {
            let stored = &existing.attributes.metadata.data_file;
            node.attributes.metadata.data_file.id = stored.id;
            node.attributes.metadata.data_file.checksum = stored.checksum.clone();
            node.attributes.metadata.data_file.storage_identifier = stored.storage_identifier.clone();
            node.attributes.local_hash = existing.attributes.local_hash.clone();
        }
        merged.insert(id, node);
    }
    merged
}
