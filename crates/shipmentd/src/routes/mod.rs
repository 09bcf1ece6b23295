//! HTTP ルート

pub mod api;
pub mod deploy;
pub mod github;
pub mod remove;

use crate::state::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use shipment_deploy::DeployError;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // デプロイ操作
        .route("/deploy", post(deploy::handle))
        .route("/remove", post(remove::handle))
        // GitHub Webhook
        .route("/github", any(github::handle))
        // 監視用
        .route("/api/running", get(api::running))
        .route("/api/details/{name}", get(api::details))
        .route("/api/info", get(api::info))
        .route("/health", get(api::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// 操作のエラーを HTTP レスポンスへ変換する
pub(crate) fn error_response(err: DeployError) -> Response {
    let status = match &err {
        DeployError::NotFound { .. } => StatusCode::NOT_FOUND,
        DeployError::LockTimeout { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

/// 操作結果に `status` フィールドを足して返す
pub(crate) fn result_response<T: serde::Serialize>(result: &T, status: &str) -> Response {
    match serde_json::to_value(result) {
        Ok(mut value) => {
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "status".to_string(),
                    serde_json::Value::String(status.to_string()),
                );
            }
            Json(value).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
