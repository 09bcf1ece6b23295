//! HTTP ハンドラが共有する状態

use crate::hook::GithubHook;
use shipment_deploy::Deployer;
use std::sync::Arc;

pub struct AppState {
    pub deployer: Arc<Deployer>,
    pub secret: String,
    pub hook: GithubHook,
}
