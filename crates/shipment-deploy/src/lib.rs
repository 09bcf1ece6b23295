//! Shipment のデプロイ制御
//!
//! ロールアウトと撤去の 2 つの操作を、デプロイロックとタスクグラフの
//! 上に組み立てます。

pub mod deployer;
pub mod error;
pub mod host;
pub mod removal;
pub mod result;
pub mod rollout;

pub use deployer::{Deployer, DeployerOptions};
pub use error::{DeployError, Result};
pub use host::compose_virtual_host;
pub use result::{RemovalResult, RolloutResult};
pub use rollout::RolloutRequest;
