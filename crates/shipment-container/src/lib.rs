//! Shipment の Docker 連携
//!
//! イメージのビルド（tar.gz コンテキスト）、レプリカ起動、ラベルに
//! よるコンテナ・イメージの発見、停止・削除・世代整理を提供します。

pub mod builder;
pub mod cleanup;
pub mod context;
pub mod discovery;
pub mod error;
pub mod launcher;

pub use builder::ImageBuilder;
pub use cleanup::{DEFAULT_KEEP_IMAGES, pick_stale, remove_stale_images};
pub use context::ContextBuilder;
pub use discovery::{ImageRecord, RunningInstance, find_deployed, find_images, list_running};
pub use error::{ContainerError, Result};
pub use launcher::{Launched, generate_name, launch_replicas, merge_runtime_args};

use bollard::Docker;

/// Docker への接続を初期化し、疎通を確認する
pub async fn connect() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults()?;
    docker.ping().await?;
    Ok(docker)
}
