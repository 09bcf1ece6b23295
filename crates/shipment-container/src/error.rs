use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Dockerfile が見つかりません: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Docker 接続エラー: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("イメージのビルドに失敗しました: {0}")]
    BuildFailed(String),

    #[error("コンテナの起動に失敗しました ({name}): {message}")]
    LaunchFailed { name: String, message: String },

    #[error("実行引数が不正です ({flag}): {message}")]
    InvalidRuntimeArg { flag: String, message: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
