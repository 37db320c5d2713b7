//! 文件内容的 SHA-256 摘要。

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config::HASH_READ_BUF;

/// 流式摘要：写入过程中逐块折叠，避免二次读取。
#[derive(Default)]
pub struct StreamDigest {
    hasher: Sha256,
}

impl StreamDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// 两遍策略：读回已存文件计算摘要。与流式策略对相同字节产出相同结果。
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = StreamDigest::new();
    let mut buf = vec![0u8; HASH_READ_BUF];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.update(&buf[..read]);
    }
    Ok(digest.finish())
}
