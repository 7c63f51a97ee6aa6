//! Simulated dataset repository with an in-memory inventory.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use ferry_core::constants::EDIT_PERMISSION;
use ferry_core::dataset::{AddFileData, ByteSource, DatasetRepository};
use ferry_core::error::{Error, Result};
use ferry_core::tree::{Checksum, DataFile, FileMetadata};

#[derive(Default)]
struct State {
    next_id: i64,
    files: HashMap<i64, FileMetadata>,
    contents: HashMap<i64, Vec<u8>>,
    permissions: Vec<String>,
    deposits: Vec<(String, Vec<u8>)>,
    clean_calls: usize,
    fail_add: bool,
    fail_delete: bool,
}

/// In-memory [`DatasetRepository`] with failure injection.
pub struct FakeDatasetRepository {
    state: Mutex<State>,
}

impl Default for FakeDatasetRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDatasetRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                permissions: vec![EDIT_PERMISSION.to_string()],
                ..State::default()
            }),
        }
    }

    /// Seed the inventory with a stored file; returns its numeric id.
    pub fn seed_file(
        &self,
        directory_label: &str,
        filename: &str,
        checksum_kind: &str,
        checksum_value: &str,
        storage_identifier: &str,
        bytes: &[u8],
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.files.insert(
            id,
            FileMetadata {
                label: filename.to_string(),
                directory_label: directory_label.to_string(),
                data_file: DataFile {
                    id,
                    filename: filename.to_string(),
                    content_type: "application/octet-stream".into(),
                    filesize: bytes.len() as u64,
                    storage_identifier: storage_identifier.to_string(),
                    checksum: Checksum {
                        kind: checksum_kind.to_string(),
                        value: checksum_value.to_string(),
                    },
                },
            },
        );
        state.contents.insert(id, bytes.to_vec());
        id
    }

    /// Remove a file behind the engine's back (an "other process").
    pub fn remove_file(&self, file_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.files.remove(&file_id);
        state.contents.remove(&file_id);
    }

    /// Replace the granted permission set.
    pub fn set_permissions(&self, permissions: Vec<String>) {
        self.state.lock().unwrap().permissions = permissions;
    }

    pub fn set_fail_add(&self, fail: bool) {
        self.state.lock().unwrap().fail_add = fail;
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.state.lock().unwrap().fail_delete = fail;
    }

    /// Snapshot of the current inventory.
    pub fn files(&self) -> Vec<FileMetadata> {
        self.state.lock().unwrap().files.values().cloned().collect()
    }

    /// Find a file by directory label and filename.
    pub fn find_file(&self, directory_label: &str, filename: &str) -> Option<FileMetadata> {
        self.state
            .lock()
            .unwrap()
            .files
            .values()
            .find(|f| f.directory_label == directory_label && f.data_file.filename == filename)
            .cloned()
    }

    /// Recorded deposit-endpoint uploads as `(persistentId, zip bytes)`.
    pub fn deposits(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().deposits.clone()
    }

    /// How many times `cleanStorage` was invoked.
    pub fn clean_calls(&self) -> usize {
        self.state.lock().unwrap().clean_calls
    }
}

#[async_trait]
impl DatasetRepository for FakeDatasetRepository {
    async fn list_files(&self, _token: &str, _persistent_id: &str) -> Result<Vec<FileMetadata>> {
        Ok(self.files())
    }

    async fn add_file(&self, _token: &str, persistent_id: &str, data: AddFileData) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_add {
            return Err(Error::UpstreamHttp {
                status: 500,
                message: format!("registering file in {persistent_id} failed"),
            });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.files.insert(
            id,
            FileMetadata {
                label: data.file_name.clone(),
                directory_label: data.directory_label.clone().unwrap_or_default(),
                data_file: DataFile {
                    id,
                    filename: data.file_name,
                    content_type: data.mime_type,
                    filesize: 0,
                    storage_identifier: data.storage_identifier,
                    checksum: data.checksum,
                },
            },
        );
        Ok(())
    }

    async fn delete_file(&self, _token: &str, file_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(Error::UpstreamHttp {
                status: 500,
                message: format!("deleting file {file_id} failed"),
            });
        }
        if state.files.remove(&file_id).is_none() {
            return Err(Error::UpstreamHttp {
                status: 404,
                message: format!("no file with id {file_id}"),
            });
        }
        state.contents.remove(&file_id);
        Ok(())
    }

    async fn check_permission(&self, _token: &str, persistent_id: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.permissions.iter().any(|p| p == EDIT_PERMISSION) {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                message: format!("may not edit dataset {persistent_id}"),
            })
        }
    }

    async fn clean_storage(&self, _token: &str, _persistent_id: &str) -> Result<()> {
        self.state.lock().unwrap().clean_calls += 1;
        Ok(())
    }

    async fn download_file(&self, _token: &str, file_id: i64) -> Result<ByteSource> {
        let state = self.state.lock().unwrap();
        let bytes = state
            .contents
            .get(&file_id)
            .cloned()
            .ok_or_else(|| Error::UpstreamHttp {
                status: 404,
                message: format!("no file with id {file_id}"),
            })?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn deposit_zip(
        &self,
        _token: &str,
        persistent_id: &str,
        mut archive: Box<dyn AsyncRead + Send + Unpin + 'static>,
    ) -> Result<()> {
        let mut bytes = Vec::new();
        archive
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| Error::RemoteClosed {
                message: e.to_string(),
            })?;
        self.state
            .lock()
            .unwrap()
            .deposits
            .push((persistent_id.to_string(), bytes));
        Ok(())
    }
}
