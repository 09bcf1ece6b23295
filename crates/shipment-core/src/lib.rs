//! Shipment のコア機能
//!
//! デプロイ対象のモデル、タスクグラフ実行エンジン、デプロイロック、
//! 記述子の解決とテンプレート展開を提供します。

pub mod error;
pub mod graph;
pub mod lock;
pub mod model;
pub mod resolver;
pub mod template;

pub use error::{CoreError, Result};
pub use graph::{GraphError, TaskGraph};
pub use lock::{DeployLock, LockGuard};
pub use model::{
    DeployConfig, DeployTarget, LABEL_BRANCH, LABEL_DEPLOY, LABEL_DEPLOY_VALUE, LABEL_ORG,
    LABEL_REPO, Scale, image_family, image_tag, safe_branch_name,
};
pub use resolver::resolve_config;
pub use template::TemplateExpander;
