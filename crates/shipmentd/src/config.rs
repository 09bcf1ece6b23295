//! プロセス設定
//!
//! フラグと環境変数の両方から読む。GitHub 認証と共有シークレットは
//! 必須で、欠けていれば起動しない。

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "shipmentd")]
#[command(about = "Webhook 駆動のコンテナデプロイデーモン", long_about = None)]
pub struct AppConfig {
    /// リッスンアドレス
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// リッスンポート
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// チェックアウト置き場
    #[arg(long, env = "REPO_PATH")]
    pub repo_path: PathBuf,

    /// 共有フォールバック記述子の置き場
    #[arg(long, env = "SHARED_CONFIG_PATH")]
    pub shared_config_path: Option<PathBuf>,

    /// クローンに使う GitHub ユーザー名
    #[arg(long, env = "GITHUB_USERNAME")]
    pub username: String,

    /// クローンに使う GitHub トークン
    #[arg(long, env = "GITHUB_TOKEN")]
    pub token: String,

    /// API と Webhook の共有シークレット
    #[arg(long, env = "SHIPMENT_SECRET")]
    pub secret: String,

    /// デプロイ環境（scale の解決とテンプレート変数）
    #[arg(long, env = "SHIPMENT_ENV", default_value = "production")]
    pub env: String,

    /// バーチャルホスト合成に使うルートドメイン
    #[arg(long, env = "DOMAIN")]
    pub domain: Option<String>,

    /// デプロイを許可するブランチ（カンマ区切り。未指定なら全ブランチ）
    #[arg(long, env = "BRANCH_WHITELIST", value_delimiter = ',')]
    pub branch_whitelist: Vec<String>,

    /// デプロイ記述子のファイル名
    #[arg(long, env = "CONFIG_FILE", default_value = "shipment.json")]
    pub config_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_args() {
        let config = AppConfig::try_parse_from([
            "shipmentd",
            "--repo-path",
            "/var/lib/shipment",
            "--username",
            "bot",
            "--token",
            "t0ken",
            "--secret",
            "s3cret",
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.env, "production");
        assert_eq!(config.config_file, "shipment.json");
        assert!(config.branch_whitelist.is_empty());
    }

    #[test]
    fn test_missing_secret_fails() {
        let result = AppConfig::try_parse_from([
            "shipmentd",
            "--repo-path",
            "/var/lib/shipment",
            "--username",
            "bot",
            "--token",
            "t0ken",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_branch_whitelist_is_comma_separated() {
        let config = AppConfig::try_parse_from([
            "shipmentd",
            "--repo-path",
            "/var/lib/shipment",
            "--username",
            "bot",
            "--token",
            "t0ken",
            "--secret",
            "s3cret",
            "--branch-whitelist",
            "master,develop",
        ])
        .unwrap();
        assert_eq!(config.branch_whitelist, vec!["master", "develop"]);
    }
}
