use crate::routes::{error_response, result_response};
use crate::state::AppState;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use shipment_core::DeployTarget;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct RemoveBody {
    pub org: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub secret: String,
}

fn default_branch() -> String {
    "master".to_string()
}

/// POST /remove
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RemoveBody>,
) -> Response {
    if body.secret != state.secret {
        return (StatusCode::UNAUTHORIZED, "invalid secret").into_response();
    }

    let target = DeployTarget::new(body.org, body.repo, body.branch);
    match state.deployer.remove(target).await {
        Ok(result) => result_response(&result, "removed"),
        Err(e) => error_response(e),
    }
}
