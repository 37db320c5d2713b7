//! 上传编排：限流 → 鉴权 → 校验 → 流式落盘 → 摘要 → 响应。

use axum::extract::{Extension, Multipart, Query, connect_info::ConnectInfo};
use axum::http::{HeaderMap, header};
use axum::response::Json as JsonResponse;
use axum_extra::TypedHeader;
use axum_extra::extract::CookieJar;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::gate::{Gate, authorize_request};
use crate::http::resolve_client_ip;
use crate::ingest::{self, StoredFile};
use crate::storage::Storage;
use crate::validate::{ValidationPolicy, validate};

/// 上传管线的运行参数。
#[derive(Debug)]
pub struct UploadConfig {
    pub policy: ValidationPolicy,
    pub timeout: Duration,
}

#[derive(Deserialize)]
pub(crate) struct TokenQuery {
    pub(crate) token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadResponse {
    success: bool,
    filename: String,
    original_name: String,
    size: u64,
    hash: String,
    upload_path: String,
    upload_time: String,
}

/// 接收单个归档文件。每个阶段失败即短路为结构化错误响应；
/// 限流计数先于鉴权，鉴权先于校验，校验先于任何字节落盘。
pub async fn upload_archive(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(gate): Extension<Arc<Gate>>,
    Extension(config): Extension<Arc<UploadConfig>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(TokenQuery { token }): Query<TokenQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let client_ip = resolve_client_ip(&headers, Some(addr.ip())).unwrap_or_else(|| addr.ip());
    gate.note_attempt(client_ip).await?;
    authorize_request(&gate, bearer.as_ref(), token.as_deref(), &jar).await?;

    // 声明长度可缺失也可伪造：超限即刻拒绝，真实上限在流中再次强制。
    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if let Some(len) = declared_len
        && len > config.policy.max_bytes
    {
        return Err(ApiError::TooLarge(config.policy.max_bytes));
    }

    let mut accepted: Option<(String, StoredFile)> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                if let Some((_, file)) = accepted.take() {
                    ingest::discard_partial(&file.path).await;
                }
                return Err(ApiError::Io(err.to_string()));
            }
        };

        // 非文件的表单字段不参与上传，跳过。
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };

        if let Some((_, file)) = accepted.take() {
            ingest::discard_partial(&file.path).await;
            warn!(client_ip = %client_ip, "second file part rejected");
            return Err(ApiError::UnexpectedField);
        }

        let content_type = field.content_type().map(str::to_string);
        validate(
            &original_name,
            content_type.as_deref(),
            declared_len,
            &config.policy,
        )?;

        let stored = ingest::ingest_stream(
            &storage,
            &original_name,
            field,
            config.policy.max_bytes,
            config.timeout,
        )
        .await?;
        accepted = Some((original_name, stored));
    }

    let Some((original_name, file)) = accepted else {
        return Err(ApiError::BadRequest("no file was uploaded".into()));
    };

    info!(
        client_ip = %client_ip,
        original = original_name,
        stored = file.file_name,
        size = file.size,
        "upload complete"
    );
    Ok(JsonResponse(UploadResponse {
        success: true,
        filename: file.file_name,
        original_name,
        size: file.size,
        hash: file.digest,
        upload_path: file.path.display().to_string(),
        upload_time: file.created_at.to_rfc3339(),
    }))
}
