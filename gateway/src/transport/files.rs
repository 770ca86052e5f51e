//! Storage for multipart file payloads.
//!
//! Uploaded file parts never travel inline through a plugin channel; the
//! HTTP adapter persists them here and replaces the bytes with an opaque
//! `devicehub://files/{key}` URI the `files` profile can serve back.

use std::path::PathBuf;

use bytes::Bytes;
use dashmap::DashMap;
use devicehub_plugin_api::FileReference;
use uuid::Uuid;

use crate::errors::GatewayError;

const URI_PREFIX: &str = "devicehub://files/";

struct StoredFile {
    path: PathBuf,
    content_type: String,
    file_name: Option<String>,
}

pub struct FileStore {
    dir: PathBuf,
    entries: DashMap<String, StoredFile>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(&dir).map_err(|e| {
            GatewayError::Internal(format!("cannot create storage dir {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            entries: DashMap::new(),
        })
    }

    /// Persist one file payload and return the reference to hand to plugins.
    pub async fn save(
        &self,
        file_name: Option<String>,
        content_type: String,
        data: Bytes,
    ) -> Result<FileReference, GatewayError> {
        let key = Uuid::new_v4().to_string();
        let path = self.dir.join(&key);
        tokio::fs::write(&path, &data).await.map_err(|e| {
            GatewayError::Internal(format!("cannot persist upload {}: {e}", path.display()))
        })?;
        self.entries.insert(
            key.clone(),
            StoredFile {
                path,
                content_type,
                file_name: file_name.clone(),
            },
        );
        Ok(FileReference {
            uri: format!("{URI_PREFIX}{key}"),
            file_name,
        })
    }

    /// Read a stored payload back by its opaque URI.
    pub async fn read(&self, uri: &str) -> Result<(String, Vec<u8>), GatewayError> {
        let key = uri
            .strip_prefix(URI_PREFIX)
            .filter(|k| !k.is_empty() && !k.contains('/'))
            .ok_or_else(|| {
                GatewayError::InvalidRequestParameter(format!("unknown file uri: {uri}"))
            })?;
        let (path, content_type) = {
            let entry = self.entries.get(key).ok_or_else(|| {
                GatewayError::InvalidRequestParameter(format!("unknown file uri: {uri}"))
            })?;
            (entry.path.clone(), entry.content_type.clone())
        };
        let data = tokio::fs::read(&path).await.map_err(|e| {
            GatewayError::Internal(format!("cannot read stored file {}: {e}", path.display()))
        })?;
        Ok((content_type, data))
    }

    /// Original client-supplied file name, if any.
    pub fn file_name(&self, uri: &str) -> Option<String> {
        let key = uri.strip_prefix(URI_PREFIX)?;
        self.entries.get(key).and_then(|e| e.file_name.clone())
    }
}
