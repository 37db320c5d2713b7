//! 存活与鉴权状态探针。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::gate::Gate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    status: &'static str,
    guarded: bool,
    timestamp: String,
}

/// 存活探针。
pub async fn health() -> JsonResponse<HealthResponse> {
    JsonResponse(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// 鉴权状态探针：客户端据此决定是否先走 `/auth`。
pub async fn server_status(Extension(gate): Extension<Arc<Gate>>) -> JsonResponse<StatusResponse> {
    JsonResponse(StatusResponse {
        status: "ok",
        guarded: gate.is_guarded(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
