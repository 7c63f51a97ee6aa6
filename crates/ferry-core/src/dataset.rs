//! Dataset-repository contract and its HTTP implementation.
//!
//! The dataset repository is authoritative for file inventories; the
//! engine only consumes the surface below. Responses carry `status: "OK"`
//! on success; anything else maps to [`Error::UpstreamHttp`].

use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use crate::constants::EDIT_PERMISSION;
use crate::error::{Error, Result};
use crate::tree::{Checksum, FileMetadata};

/// A byte source handed back by download operations.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Registration record for a freshly stored file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddFileData {
    pub storage_identifier: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_label: Option<String>,
    pub mime_type: String,
    pub checksum: Checksum,
}

/// The consumed surface of the dataset repository.
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    /// List the current file inventory of a dataset.
    async fn list_files(&self, token: &str, persistent_id: &str) -> Result<Vec<FileMetadata>>;

    /// Register a stored file with the dataset.
    async fn add_file(&self, token: &str, persistent_id: &str, data: AddFileData) -> Result<()>;

    /// Delete a file by its repository-assigned numeric id.
    async fn delete_file(&self, token: &str, file_id: i64) -> Result<()>;

    /// Verify the caller may edit the dataset.
    async fn check_permission(&self, token: &str, persistent_id: &str) -> Result<()>;

    /// Ask the repository to collect unregistered storage objects.
    async fn clean_storage(&self, token: &str, persistent_id: &str) -> Result<()>;

    /// Stream a stored file's bytes by numeric id.
    async fn download_file(&self, token: &str, file_id: i64) -> Result<ByteSource>;

    /// Stream a single-entry ZIP archive into the deposit endpoint.
    ///
    /// Used by the indirect storage mode; the repository unpacks the
    /// archive and registers its entry itself.
    async fn deposit_zip(
        &self,
        token: &str,
        persistent_id: &str,
        archive: Box<dyn AsyncRead + Send + Unpin + 'static>,
    ) -> Result<()>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Vec<FileMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AddFilesResponse {
    status: String,
    data: AddFilesData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AddFilesData {
    result: AddFilesResult,
    files: Vec<AddFilesFileStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AddFilesResult {
    added: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AddFilesFileStatus {
    error_message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PermissionsResponse {
    status: String,
    data: PermissionsData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PermissionsData {
    user: String,
    permissions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusResponse {
    status: String,
    data: StatusData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusData {
    message: String,
}

/// Reqwest-backed client for the dataset repository's REST/SWORD API.
pub struct HttpDatasetRepository {
    base_url: String,
    unblock_key: String,
    client: reqwest::Client,
}

impl HttpDatasetRepository {
    /// Create a client against `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>, unblock_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            unblock_key: unblock_key.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn upstream_error(response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Error::UpstreamHttp { status, message }
    }
}

#[async_trait]
impl DatasetRepository for HttpDatasetRepository {
    async fn list_files(&self, token: &str, persistent_id: &str) -> Result<Vec<FileMetadata>> {
        let url = format!(
            "{}/api/datasets/:persistentId/versions/:latest/files",
            self.base_url
        );
        let response = self
            .client
            .get(url)
            .query(&[("persistentId", persistent_id)])
            .header("X-Dataset-Key", token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }
        let body: ListResponse = response.json().await?;
        if body.status != "OK" {
            return Err(Error::UpstreamHttp {
                status: 200,
                message: format!("listing files for {persistent_id} failed: {}", body.status),
            });
        }
        Ok(body.data)
    }

    async fn add_file(&self, token: &str, persistent_id: &str, data: AddFileData) -> Result<()> {
        let url = format!("{}/api/datasets/:persistentId/addFiles", self.base_url);
        let json = serde_json::to_string(&[&data])?;
        let form = reqwest::multipart::Form::new().text("jsonData", json);
        let response = self
            .client
            .post(url)
            .query(&[("persistentId", persistent_id)])
            .header("X-Dataset-Key", token)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }
        let body: AddFilesResponse = response.json().await?;
        if body.data.result.added != 1 {
            let message = body
                .data
                .files
                .first()
                .map(|f| f.error_message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("registering file in {persistent_id} failed"));
            return Err(Error::UpstreamHttp {
                status: 200,
                message,
            });
        }
        Ok(())
    }

    async fn delete_file(&self, token: &str, file_id: i64) -> Result<()> {
        let url = format!(
            "{}/dvn/api/data-deposit/v1.1/swordv2/edit-media/file/{file_id}",
            self.base_url
        );
        let response = self
            .client
            .delete(url)
            .basic_auth(token, Some(""))
            .send()
            .await?;
        match response.status().as_u16() {
            200 | 202 | 204 => Ok(()),
            _ => Err(Self::upstream_error(response).await),
        }
    }

    async fn check_permission(&self, token: &str, persistent_id: &str) -> Result<()> {
        let url = format!("{}/api/admin/permissions/:persistentId", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("persistentId", persistent_id),
                ("unblock-key", self.unblock_key.as_str()),
            ])
            .header("X-Dataset-Key", token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }
        let body: PermissionsResponse = response.json().await?;
        if body.status != "OK" {
            return Err(Error::UpstreamHttp {
                status: 200,
                message: format!(
                    "permission check status is {} for dataset {persistent_id}",
                    body.status
                ),
            });
        }
        if body
            .data
            .permissions
            .iter()
            .any(|p| p == EDIT_PERMISSION)
        {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                message: format!(
                    "user {} may not edit dataset {persistent_id}",
                    body.data.user
                ),
            })
        }
    }

    async fn clean_storage(&self, token: &str, persistent_id: &str) -> Result<()> {
        let url = format!(
            "{}/api/datasets/:persistentId/cleanStorage",
            self.base_url
        );
        let response = self
            .client
            .get(url)
            .query(&[("persistentId", persistent_id)])
            .header("X-Dataset-Key", token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }
        let body: StatusResponse = response.json().await?;
        if body.status != "OK" {
            return Err(Error::UpstreamHttp {
                status: 200,
                message: format!("cleaning storage for {persistent_id} failed"),
            });
        }
        debug!(persistent_id, message = body.data.message.as_str(), "storage cleaned");
        Ok(())
    }

    async fn download_file(&self, token: &str, file_id: i64) -> Result<ByteSource> {
        let url = format!("{}/api/access/datafile/{file_id}", self.base_url);
        let response = self
            .client
            .get(url)
            .header("X-Dataset-Key", token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn deposit_zip(
        &self,
        token: &str,
        persistent_id: &str,
        archive: Box<dyn AsyncRead + Send + Unpin + 'static>,
    ) -> Result<()> {
        let url = format!(
            "{}/dvn/api/data-deposit/v1.1/swordv2/edit-media/study/{persistent_id}",
            self.base_url
        );
        let body = reqwest::Body::wrap_stream(ReaderStream::new(archive));
        let response = self
            .client
            .post(url)
            .basic_auth(token, Some(""))
            .header("Content-Type", "application/zip")
            .header("Packaging", "http://purl.org/net/sword/package/SimpleZip")
            .body(body)
            .send()
            .await?;
        match response.status().as_u16() {
            200 | 201 | 202 => Ok(()),
            _ => Err(Self::upstream_error(response).await),
        }
    }
}

/// Build a node-id keyed view of a listing for redundancy filtering.
pub fn listing_ids(listing: &[FileMetadata]) -> HashMap<String, i64> {
    listing
        .iter()
        .map(|meta| {
            (
                crate::tree::node_id(&meta.directory_label, &meta.data_file.filename),
                meta.data_file.id,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_data_serializes_camel_case() {
        let data = AddFileData {
            storage_identifier: "file://abc".into(),
            file_name: "a.txt".into(),
            directory_label: None,
            mime_type: "application/octet-stream".into(),
            checksum: Checksum {
                kind: "md5".into(),
                value: "5d41402abc4b2a76b9719d911017c592".into(),
            },
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["storageIdentifier"], "file://abc");
        assert_eq!(json["fileName"], "a.txt");
        assert_eq!(json["checksum"]["type"], "md5");
        // An empty directory label is omitted entirely.
        assert!(json.get("directoryLabel").is_none());
    }

    #[test]
    fn permissions_response_parses() {
        let raw = r#"{"status":"OK","data":{"user":"@ada","permissions":["ViewUnpublishedDataset","EditDataset"]}}"#;
        let parsed: PermissionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, "OK");
        assert!(parsed.data.permissions.contains(&"EditDataset".to_string()));
    }

    #[test]
    fn listing_ids_keyed_by_node_id() {
        let listing = vec![FileMetadata {
            directory_label: "docs".into(),
            data_file: crate::tree::DataFile {
                id: 9,
                filename: "b.txt".into(),
                ..Default::default()
            },
            ..Default::default()
        }];
        let ids = listing_ids(&listing);
        assert_eq!(ids.get("docs/b.txt"), Some(&9));
    }
}
