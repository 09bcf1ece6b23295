//! Shipment のソース取得機能
//!
//! git CLI を使ったチェックアウトの作成・更新・削除を提供します。

pub mod error;
pub mod workdir;

pub use error::{Result, SourceError};
pub use workdir::Workdir;
