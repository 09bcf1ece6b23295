use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("設定ファイルの読み込みエラー: {path}\n理由: {message}")]
    ConfigRead { path: PathBuf, message: String },

    #[error("設定ファイルのパースエラー: {path}\n理由: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("テンプレート展開エラー: {0}")]
    TemplateRender(String),

    #[error("デプロイロックの取得がタイムアウトしました: {org}/{repo} ({attempts} 回リトライ)")]
    LockTimeout {
        org: String,
        repo: String,
        attempts: u32,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
