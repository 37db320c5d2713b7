//! 已上传归档的列表与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::extract::CookieJar;
use axum_extra::headers::{Authorization, authorization::Bearer};
use httpdate::fmt_http_date;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::ApiError;
use crate::gate::{Gate, authorize_request};
use crate::naming;
use crate::storage::{Storage, UploadEntry};
use crate::upload::TokenQuery;

/// 列出全部已存归档，含还原的原始名与可读大小。
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(gate): Extension<Arc<Gate>>,
    Query(TokenQuery { token }): Query<TokenQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
) -> Result<JsonResponse<Vec<UploadEntry>>, ApiError> {
    authorize_request(&gate, bearer.as_ref(), token.as_deref(), &jar).await?;

    let entries = storage.list_uploads().await?;
    info!(count = entries.len(), "list uploads");
    Ok(JsonResponse(entries))
}

/// 下载归档：以剥离消歧前缀后的原始名作为附件名回传。
pub async fn download_file(
    Path(filename): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(gate): Extension<Arc<Gate>>,
    Query(TokenQuery { token }): Query<TokenQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    authorize_request(&gate, bearer.as_ref(), token.as_deref(), &jar).await?;

    let target = storage.resolve_stored(&filename)?;
    let metadata = match fs::metadata(&target).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(ApiError::NotFound("file not found".into())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file not found".into()));
        }
        Err(err) => return Err(ApiError::Io(err.to_string())),
    };

    let original = naming::original_name_from_stored(&filename).unwrap_or(filename.as_str());
    let mime = mime_guess::from_path(original).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime for stored file".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::Internal("response header build failed".into()))?,
    );
    // 落盘名经过清洗，原始名可安全放入带引号的附件名。
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{original}\""))
            .map_err(|_| ApiError::Internal("response header build failed".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("response header build failed".into()))?,
        );
    }

    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Io(err.to_string()))?;
    info!(filename, size = metadata.len(), "download archive");
    let stream = ReaderStream::new(file);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("uploads");
        std::fs::create_dir_all(&root).expect("create upload root");
        (temp, Arc::new(Storage::new(root)))
    }

    fn open_gate() -> Arc<Gate> {
        Arc::new(Gate::new(None, Duration::ZERO, Duration::from_secs(900), 0))
    }

    async fn run_download(
        storage: Arc<Storage>,
        gate: Arc<Gate>,
        filename: &str,
    ) -> Result<Response, ApiError> {
        download_file(
            Path(filename.to_string()),
            Extension(storage),
            Extension(gate),
            Query(TokenQuery { token: None }),
            None,
            CookieJar::new(),
        )
        .await
    }

    #[tokio::test]
    async fn list_reports_stored_archives() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("1754560000000-a.zip"), b"aa").expect("write");
        std::fs::write(storage.root_path().join("1754560000001-b.zip"), b"bbb").expect("write");

        let JsonResponse(entries) = list_files(
            Extension(storage),
            Extension(open_gate()),
            Query(TokenQuery { token: None }),
            None,
            CookieJar::new(),
        )
        .await
        .expect("list");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].filename, "1754560000001-b.zip");
        assert_eq!(entries[0].original_name.as_deref(), Some("b.zip"));
    }

    #[tokio::test]
    async fn guarded_list_requires_token() {
        let (_temp, storage) = make_storage();
        let gate = Arc::new(Gate::new(
            Some("letmein".to_string()),
            Duration::ZERO,
            Duration::from_secs(900),
            0,
        ));

        let result = list_files(
            Extension(storage),
            Extension(gate),
            Query(TokenQuery { token: None }),
            None,
            CookieJar::new(),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthenticated)));
    }

    #[tokio::test]
    async fn download_restores_original_name() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("1754560000000-report.zip"), b"abc")
            .expect("write");

        let response = run_download(storage, open_gate(), "1754560000000-report.zip")
            .await
            .expect("download");
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .expect("content disposition");
        assert_eq!(disposition, "attachment; filename=\"report.zip\"");
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok()),
            Some("3")
        );
    }

    #[tokio::test]
    async fn download_missing_file_is_not_found() {
        let (_temp, storage) = make_storage();
        let result = run_download(storage, open_gate(), "1754560000000-gone.zip").await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn download_rejects_traversal_names() {
        let (_temp, storage) = make_storage();
        let result = run_download(storage, open_gate(), "../secret.zip").await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
