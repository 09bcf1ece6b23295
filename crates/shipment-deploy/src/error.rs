use shipment_container::ContainerError;
use shipment_core::CoreError;
use shipment_source::SourceError;
use thiserror::Error;

/// ロールアウト・撤去の致命的エラー
///
/// どの種別もタスクグラフの残りステップを中断させ、ロックを解放した
/// うえで呼び出し元へ返る。イメージ整理の失敗はここには現れない
/// （警告ログのみで結果に影響しない）。
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("デプロイロックの取得がタイムアウトしました: {org}/{repo}")]
    LockTimeout { org: String, repo: String },

    #[error("ソース取得エラー ({target}): {source}")]
    SourceFetch {
        target: String,
        #[source]
        source: SourceError,
    },

    #[error("設定エラー ({target}): {source}")]
    Config {
        target: String,
        #[source]
        source: CoreError,
    },

    #[error("ビルドエラー ({target}): {source}")]
    Build {
        target: String,
        #[source]
        source: ContainerError,
    },

    #[error("起動エラー ({target}): {source}")]
    Launch {
        target: String,
        #[source]
        source: ContainerError,
    },

    #[error("コンテナ操作エラー ({target}): {source}")]
    Container {
        target: String,
        #[source]
        source: ContainerError,
    },

    #[error("リポジトリが見つかりません: {repo}")]
    NotFound { repo: String },

    #[error("タスクグラフの構成エラー: {0}")]
    Graph(String),

    #[error("内部エラー: ステップ '{0}' の結果がありません")]
    MissingStepResult(&'static str),
}

pub type Result<T> = std::result::Result<T, DeployError>;
