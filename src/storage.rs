use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;

use crate::naming;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolves a stored file name to its path under the upload root.
    /// Only a single plain path component is accepted; anything else is a
    /// traversal attempt.
    pub fn resolve_stored(&self, file_name: &str) -> Result<PathBuf, StorageError> {
        if file_name.is_empty() || file_name.contains('\0') {
            return Err(StorageError::InvalidPath);
        }
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidPath),
        }
    }

    pub async fn list_uploads(&self) -> Result<Vec<UploadEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            let upload_time = DateTime::<Utc>::from(modified).to_rfc3339();

            entries.push(UploadEntry {
                original_name: naming::original_name_from_stored(&name).map(str::to_string),
                filename: name,
                size: metadata.len(),
                upload_time,
                size_formatted: format_size(metadata.len()),
            });
        }

        // 时间戳前缀即排序键，新上传在前。
        entries.sort_by(|a, b| b.filename.cmp(&a.filename));

        Ok(entries)
    }
}

pub fn format_size(size: u64) -> String {
    format!("{:.2} MB", size as f64 / 1024.0 / 1024.0)
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    pub size: u64,
    pub upload_time: String,
    pub size_formatted: String,
}
