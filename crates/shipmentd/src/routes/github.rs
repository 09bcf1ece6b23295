use crate::hook::{HookError, HookKind};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use shipment_deploy::RolloutRequest;
use std::sync::Arc;
use tracing::{error, info};

/// ANY /github
///
/// 署名を検証してイベントを正規化し、該当する操作をバックグラウンドで
/// 起動してから即座に 200 "ok" を返す（fire-and-forget）。
/// ディスパッチ後の失敗はログにしか現れない。
pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok());
    let signature = headers
        .get("x-hub-signature")
        .and_then(|v| v.to_str().ok());

    match state.hook.parse(event, signature, &body) {
        Err(HookError::SignatureMismatch) => {
            (StatusCode::UNAUTHORIZED, "invalid secret").into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Ok(None) => "nothing to deploy".into_response(),
        Ok(Some(event)) => {
            info!(target = %event.target, kind = ?event.kind, "Dispatching webhook event");
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let target = event.target.clone();
                let outcome = match event.kind {
                    HookKind::Push => state
                        .deployer
                        .run(RolloutRequest {
                            target: event.target,
                            config_file: None,
                        })
                        .await
                        .map(|_| ()),
                    HookKind::Remove => state.deployer.remove(event.target).await.map(|_| ()),
                };
                if let Err(e) = outcome {
                    error!(%target, error = %e, "Webhook-triggered operation failed");
                }
            });
            "ok".into_response()
        }
    }
}
