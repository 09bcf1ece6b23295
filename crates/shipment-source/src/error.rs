use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("git コマンドの起動に失敗しました ({context}): {message}")]
    Spawn { context: String, message: String },

    #[error("git コマンドが失敗しました ({context})\nstderr: {stderr}")]
    CommandFailed { context: String, stderr: String },

    #[error("IO エラー: {path}\n理由: {message}")]
    Io { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, SourceError>;
