//! デプロイ対象と設定のモデル

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 起動したコンテナに必ず付与するラベル
pub const LABEL_DEPLOY: &str = "shipment";
pub const LABEL_DEPLOY_VALUE: &str = "deploy";
pub const LABEL_REPO: &str = "shipment-repo";
pub const LABEL_BRANCH: &str = "shipment-branch";
pub const LABEL_ORG: &str = "shipment-org";

/// デプロイ対象（organization / repository / branch の組）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub org: String,
    pub repo: String,
    pub branch: String,
}

impl DeployTarget {
    pub fn new(
        org: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    /// タグ・コンテナ名に使う正規化済みブランチ名
    pub fn safe_branch(&self) -> String {
        safe_branch_name(&self.branch)
    }

    /// デプロイロックのキー。同一リポジトリはチェックアウトを共有する
    /// ため、ブランチが違っても直列化する（ブランチはキーに含めない）
    pub fn lock_key(&self) -> String {
        format!("{}_{}", self.org, self.repo)
    }
}

impl std::fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.org, self.repo, self.branch)
    }
}

/// ブランチ名をタグに使える形へ正規化
///
/// 最初の `/` までを取り除いて小文字化する（`feature/x` → `x`）。
/// プレフィックスだけが異なるブランチは同じ名前に潰れる。これは
/// 意図した挙動で、既知の制限として扱う。
pub fn safe_branch_name(branch: &str) -> String {
    match branch.split_once('/') {
        Some((_, rest)) => rest.to_lowercase(),
        None => branch.to_lowercase(),
    }
}

/// イメージタグ: `{repo}_{safe_branch}:{commit}`
pub fn image_tag(repo: &str, safe_branch: &str, commit: &str) -> String {
    format!("{}:{}", image_family(repo, safe_branch), commit)
}

/// タグのコミット部分を除いたイメージファミリ名: `{repo}_{safe_branch}`
pub fn image_family(repo: &str, safe_branch: &str) -> String {
    format!("{}_{}", repo, safe_branch)
}

/// レプリカ数。固定値か、デプロイ環境ごとのマップ
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scale {
    Fixed(u32),
    PerEnv(HashMap<String, u32>),
}

impl Default for Scale {
    fn default() -> Self {
        Scale::Fixed(1)
    }
}

impl Scale {
    /// 指定環境でのレプリカ数を解決（最低 1）
    pub fn for_env(&self, env: &str) -> u32 {
        let n = match self {
            Scale::Fixed(n) => *n,
            Scale::PerEnv(map) => map.get(env).copied().unwrap_or(1),
        };
        n.max(1)
    }
}

/// リポジトリごとのデプロイ記述子
///
/// リポジトリ直下（または共有フォールバック）の JSON ファイルから
/// 解決される。ファイルが無い場合はデフォルト値のみの設定になる。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// docker run 相当のフラグ → 値（ネスト可: `e` や `label` はマップ）
    #[serde(alias = "dockerargs", alias = "dockerArgs")]
    pub docker_args: serde_json::Map<String, serde_json::Value>,

    /// バーチャルホストの明示指定。未指定ならルートドメインから合成する
    #[serde(alias = "virtualHost")]
    pub virtual_host: Option<String>,

    /// バーチャルホスト合成時のサービス名プレフィックス
    pub name: Option<String>,

    /// master ブランチをルートドメインにも割り当てる
    #[serde(alias = "masterAsRoot")]
    pub master_as_root: bool,

    pub scale: Scale,

    /// 新旧コンテナ入れ替え前の猶予秒数（ゼロダウンタイム用）
    pub wait: u64,

    pub dockerfile: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            docker_args: serde_json::Map::new(),
            virtual_host: None,
            name: None,
            master_as_root: false,
            scale: Scale::default(),
            wait: 0,
            dockerfile: "Dockerfile".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_branch_name_with_slash() {
        assert_eq!(safe_branch_name("feature/x"), "x");
        assert_eq!(safe_branch_name("origin/Master"), "master");
    }

    #[test]
    fn test_safe_branch_name_without_slash() {
        assert_eq!(safe_branch_name("master"), "master");
        assert_eq!(safe_branch_name("MAIN"), "main");
    }

    #[test]
    fn test_safe_branch_name_keeps_rest_after_first_slash() {
        // 最初の `/` までだけを取り除く
        assert_eq!(safe_branch_name("feature/sub/x"), "sub/x");
    }

    #[test]
    fn test_safe_branch_collision_is_by_design() {
        // プレフィックスだけが異なるブランチは同じ名前になる（既知の制限）
        assert_eq!(safe_branch_name("feature/x"), safe_branch_name("hotfix/x"));
    }

    #[test]
    fn test_image_tag_format() {
        assert_eq!(image_tag("api", "x", "abc1234"), "api_x:abc1234");
        assert_eq!(image_family("api", "x"), "api_x");
    }

    #[test]
    fn test_lock_key_excludes_branch() {
        let a = DeployTarget::new("acme", "api", "master");
        let b = DeployTarget::new("acme", "api", "feature/x");
        assert_eq!(a.lock_key(), b.lock_key());
        assert_eq!(a.lock_key(), "acme_api");
    }

    #[test]
    fn test_scale_fixed() {
        assert_eq!(Scale::Fixed(3).for_env("production"), 3);
        // 0 は 1 に切り上げ
        assert_eq!(Scale::Fixed(0).for_env("production"), 1);
    }

    #[test]
    fn test_scale_per_env() {
        let mut map = HashMap::new();
        map.insert("production".to_string(), 4);
        map.insert("staging".to_string(), 1);
        let scale = Scale::PerEnv(map);
        assert_eq!(scale.for_env("production"), 4);
        assert_eq!(scale.for_env("staging"), 1);
        // 未定義の環境は 1
        assert_eq!(scale.for_env("dev"), 1);
    }

    #[test]
    fn test_deploy_config_defaults() {
        let config: DeployConfig = serde_json::from_str("{}").unwrap();
        assert!(config.docker_args.is_empty());
        assert_eq!(config.dockerfile, "Dockerfile");
        assert_eq!(config.wait, 0);
        assert_eq!(config.scale.for_env("production"), 1);
        assert!(config.virtual_host.is_none());
        assert!(!config.master_as_root);
    }

    #[test]
    fn test_deploy_config_legacy_field_spellings() {
        // 旧記述子のフィールド名も受け付ける
        let config: DeployConfig = serde_json::from_str(
            r#"{
                "dockerargs": { "e": { "NODE_ENV": "production" } },
                "virtualHost": "api.example.com",
                "masterAsRoot": true
            }"#,
        )
        .unwrap();
        assert!(config.docker_args.contains_key("e"));
        assert_eq!(config.virtual_host.as_deref(), Some("api.example.com"));
        assert!(config.master_as_root);
    }

    #[test]
    fn test_deploy_config_scale_map() {
        let config: DeployConfig =
            serde_json::from_str(r#"{ "scale": { "production": 3 } }"#).unwrap();
        assert_eq!(config.scale.for_env("production"), 3);
        assert_eq!(config.scale.for_env("staging"), 1);
    }
}
