//! 存活探针。

use axum::response::Json as JsonResponse;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
    message: &'static str,
}

pub async fn health() -> JsonResponse<HealthStatus> {
    JsonResponse(HealthStatus {
        status: "ok",
        message: "App is running",
    })
}
