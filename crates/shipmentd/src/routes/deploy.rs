use crate::routes::{error_response, result_response};
use crate::state::AppState;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use shipment_core::DeployTarget;
use shipment_deploy::RolloutRequest;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct DeployBody {
    pub org: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub secret: String,
    /// 記述子ファイル名の上書き
    pub config: Option<String>,
}

fn default_branch() -> String {
    "master".to_string()
}

/// POST /deploy
///
/// シークレット不一致は 401 で、ロック取得を含む一切の副作用を
/// 起こさない。
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeployBody>,
) -> Response {
    if body.secret != state.secret {
        return (StatusCode::UNAUTHORIZED, "invalid secret").into_response();
    }

    let request = RolloutRequest {
        target: DeployTarget::new(body.org, body.repo, body.branch),
        config_file: body.config,
    };

    match state.deployer.run(request).await {
        Ok(result) => result_response(&result, "deployed"),
        Err(e) => error_response(e),
    }
}
