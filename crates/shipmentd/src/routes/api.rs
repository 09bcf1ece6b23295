//! 監視用ルート

use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// GET /api/running — デプロイ済みコンテナの名前一覧
pub async fn running(State(state): State<Arc<AppState>>) -> Response {
    match shipment_container::list_running(state.deployer.docker()).await {
        Ok(instances) => {
            let names: Vec<String> = instances.into_iter().map(|c| c.name).collect();
            Json(names).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /api/details/{name} — コンテナの詳細
pub async fn details(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match shipment_container::discovery::inspect(state.deployer.docker(), &name).await {
        Ok(data) => Json(data).into_response(),
        Err(shipment_container::ContainerError::Docker(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            },
        )) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "container not found" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /api/info — デーモンのバージョン
pub async fn info() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}
