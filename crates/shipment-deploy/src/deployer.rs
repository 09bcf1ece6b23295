//! デプロイ操作の入口
//!
//! [`Deployer`] がロールアウト（rollout.rs）と撤去（removal.rs）を
//! 提供する。両操作とも `(org, repo)` 単位のデプロイロックの下で
//! タスクグラフとして実行される。

use crate::error::DeployError;
use bollard::Docker;
use shipment_core::{DeployLock, GraphError};
use shipment_source::Workdir;
use std::path::PathBuf;
use std::sync::Arc;

/// [`Deployer`] の構成
pub struct DeployerOptions {
    /// チェックアウト置き場
    pub repo_root: PathBuf,
    /// 共有フォールバック記述子の置き場
    pub shared_config_path: Option<PathBuf>,
    /// GitHub 認証（クローン URL に埋め込む）
    pub username: String,
    pub token: String,
    /// デプロイ環境（scale のマップ解決とテンプレート変数に使う）
    pub env: String,
    /// バーチャルホスト合成に使うルートドメイン
    pub root_domain: Option<String>,
    /// デフォルトの記述子ファイル名
    pub config_file: String,
}

pub struct Deployer {
    pub(crate) env: String,
    pub(crate) config_file: String,
    pub(crate) shared_config_path: Option<PathBuf>,
    pub(crate) root_domain: Option<String>,
    pub(crate) workdir: Arc<Workdir>,
    pub(crate) docker: Docker,
    pub(crate) lock: Arc<DeployLock>,
}

impl Deployer {
    pub fn new(options: DeployerOptions, docker: Docker) -> Self {
        let workdir = Arc::new(Workdir::new(
            options.repo_root,
            options.username,
            options.token,
        ));
        Self {
            env: options.env,
            config_file: options.config_file,
            shared_config_path: options.shared_config_path,
            root_domain: options.root_domain,
            workdir,
            docker,
            lock: Arc::new(DeployLock::new()),
        }
    }

    /// ロックのリトライ設定を差し替える
    pub fn with_lock(mut self, lock: Arc<DeployLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn workdir(&self) -> &Workdir {
        &self.workdir
    }
}

/// グラフのエラーを操作のエラーに戻す
///
/// ステップの失敗はその原因をそのまま（最初のエラーだけが返る）、
/// グラフ自体の構成不備は [`DeployError::Graph`] として返す。
pub(crate) fn flatten_graph_error(err: GraphError<DeployError>) -> DeployError {
    match err {
        GraphError::Step { source, .. } => source,
        other => DeployError::Graph(other.to_string()),
    }
}
