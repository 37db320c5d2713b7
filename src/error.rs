//! 统一的 API 错误类型与 JSON 响应转换。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;
use std::io::ErrorKind;
use tracing::error;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    UnsupportedType(String),
    TooLarge(u64),
    UnexpectedField,
    Unauthenticated,
    TooManyRequests(u64),
    NotFound(String),
    Io(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        JsonResponse(ErrorBody {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, msg),
            ApiError::UnsupportedType(msg) => json_error(StatusCode::BAD_REQUEST, msg),
            ApiError::TooLarge(limit) => json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "file too large, limit is {:.0} MB",
                    limit as f64 / 1024.0 / 1024.0
                ),
            ),
            ApiError::UnexpectedField => json_error(
                StatusCode::BAD_REQUEST,
                "only one file field is allowed per request",
            ),
            ApiError::Unauthenticated => {
                json_error(StatusCode::UNAUTHORIZED, "authentication required")
            }
            ApiError::TooManyRequests(retry_after) => {
                let mut headers = HeaderMap::new();
                if retry_after > 0
                    && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
                {
                    headers.insert(header::RETRY_AFTER, value);
                }
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    headers,
                    JsonResponse(ErrorBody {
                        success: false,
                        message: "too many upload attempts, try again later".into(),
                    }),
                )
                    .into_response()
            }
            ApiError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, msg),
            // 内部细节只进日志，客户端只拿到通用消息。
            ApiError::Io(detail) => {
                error!(detail = %detail, "upload io failure");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
            ApiError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest("invalid path".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("file not found".into()),
                _ => ApiError::Io(err.to_string()),
            },
        }
    }
}
