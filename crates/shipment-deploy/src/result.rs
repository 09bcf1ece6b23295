//! 操作結果。構築後は変更されない値オブジェクト

use serde::Serialize;

/// ロールアウトの結果
#[derive(Debug, Clone, Serialize)]
pub struct RolloutResult {
    pub message: String,
    /// バーチャルホストが解決された場合の URL
    pub url: Option<String>,
    /// 新しく起動したコンテナの ID
    pub ids: Vec<String>,
    /// 新しく起動したコンテナの名前
    pub names: Vec<String>,
    /// 停止・削除した旧コンテナの ID
    pub stopped_containers: Vec<String>,
    pub duration_ms: u64,
    /// 実際に適用された実行引数（再実行や監視に使える）
    pub docker_args: serde_json::Map<String, serde_json::Value>,
}

/// 撤去の結果
#[derive(Debug, Clone, Serialize)]
pub struct RemovalResult {
    pub message: String,
    pub stopped_containers: Vec<String>,
    pub removed_images: Vec<String>,
    /// 全ブランチのイメージが無くなりチェックアウトも削除したか
    pub checkout_removed: bool,
    pub duration_ms: u64,
}
