//! デプロイ記述子の解決
//!
//! リポジトリ直下の記述子を優先し、無ければ共有フォールバックを使う。
//! どこにも無い場合はデフォルト設定（エラーにはしない）。

use crate::error::{CoreError, Result};
use crate::model::{DeployConfig, DeployTarget};
use crate::template::TemplateExpander;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 記述子を解決して [`DeployConfig`] を返す
///
/// 探索順:
/// 1. `{repo_root}/{repo}/{config_file}`（リポジトリローカル）
/// 2. `{shared_config_path}/{config_file}`（共有フォールバック）
pub fn resolve_config(
    repo_root: &Path,
    shared_config_path: Option<&Path>,
    config_file: &str,
    target: &DeployTarget,
    env: &str,
) -> Result<DeployConfig> {
    let mut candidates: Vec<PathBuf> = vec![repo_root.join(&target.repo).join(config_file)];
    if let Some(shared) = shared_config_path {
        candidates.push(shared.join(config_file));
    }

    let Some(path) = candidates.iter().find(|p| p.exists()) else {
        debug!(%target, config_file, "No deploy descriptor found, using defaults");
        return Ok(DeployConfig::default());
    };

    info!(%target, path = %path.display(), "Reading deploy descriptor");

    let content = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigRead {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let mut value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| CoreError::ConfigParse {
            path: path.clone(),
            message: e.to_string(),
        })?;

    // 文字列値のテンプレート展開（repo / branch / safe_branch / env / env_vars）
    let mut expander = TemplateExpander::new(&target.repo, &target.branch, &target.safe_branch(), env);
    expander.add_process_env();
    expander.expand_value(&mut value)?;

    serde_json::from_value(value).map_err(|e| CoreError::ConfigParse {
        path: path.clone(),
        message: e.to_string(),
    })
}
