//! 上传流写入：独占创建、字节上限、超时与中断清理。

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt, pin_mut};
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::NAME_RETRY_LIMIT;
use crate::error::ApiError;
use crate::hash::StreamDigest;
use crate::naming;
use crate::storage::Storage;

/// 成功落盘的上传文件。创建后不再变更。
#[derive(Debug)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

/// 把上传流写入独占创建的目标文件，边写边折叠摘要并实施字节上限。
/// 任何失败路径（超限、流错误、超时、任务被取消）都不会在最终名下留下半成品。
pub async fn ingest_stream<S, E>(
    storage: &Storage,
    original_name: &str,
    stream: S,
    max_bytes: u64,
    timeout: Duration,
) -> Result<StoredFile, ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let sanitized = naming::sanitize_file_name(original_name);
    let (mut file, file_name, path) = create_exclusive(storage, &sanitized).await?;
    let mut guard = PartialGuard::new(path.clone());

    let write_all = write_stream(&mut file, stream, max_bytes);
    let result = if timeout.is_zero() {
        write_all.await
    } else {
        match tokio::time::timeout(timeout, write_all).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Io("upload timed out".into())),
        }
    };
    let (size, digest) = result?;

    // 先确保字节落盘，再宣告成功。
    file.sync_all()
        .await
        .map_err(|err| ApiError::Io(err.to_string()))?;
    guard.disarm();

    debug!(file_name, size, "upload stored");
    Ok(StoredFile {
        file_name,
        path,
        size,
        digest,
        created_at: Utc::now(),
    })
}

/// 删除已写入的部分文件。
pub async fn discard_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        warn!(path = ?path, error = %err, "failed to remove partial upload");
    }
}

// 独占创建目标文件；名字被占用时换下一个候选名重试，绝不先查存在再写。
async fn create_exclusive(
    storage: &Storage,
    sanitized: &str,
) -> Result<(File, String, PathBuf), ApiError> {
    let millis = Utc::now().timestamp_millis();
    for attempt in 0..NAME_RETRY_LIMIT {
        let name = naming::stored_name(millis, attempt, sanitized);
        let path = storage.root_path().join(&name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, name, path)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(ApiError::Io(err.to_string())),
        }
    }
    Err(ApiError::Io(format!(
        "no free upload name after {NAME_RETRY_LIMIT} attempts"
    )))
}

async fn write_stream<S, E>(
    file: &mut File,
    stream: S,
    max_bytes: u64,
) -> Result<(u64, String), ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    pin_mut!(stream);
    let mut digest = StreamDigest::new();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| ApiError::Io(err.to_string()))?;
        if chunk.is_empty() {
            continue;
        }
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(ApiError::TooLarge(max_bytes));
        }
        digest.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|err| ApiError::Io(err.to_string()))?;
    }
    Ok((written, digest.finish()))
}

// 半成品守卫：未解除前被丢弃（含任务取消）就同步删除目标文件。
struct PartialGuard {
    path: Option<PathBuf>,
}

impl PartialGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for PartialGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take()
            && let Err(err) = std::fs::remove_file(&path)
        {
            warn!(path = ?path, error = %err, "failed to remove partial upload");
        }
    }
}
