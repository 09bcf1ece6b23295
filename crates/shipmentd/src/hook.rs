//! GitHub Webhook の正規化
//!
//! 生ペイロードに対する HMAC-SHA1 署名を検証し、push イベントを
//! `{org, repo, branch, 種別}` に正規化する。タグの push や
//! ホワイトリスト外のブランチは「何もしない」（エラーではない）。

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use shipment_core::DeployTarget;
use thiserror::Error;
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("署名が一致しません")]
    SignatureMismatch,

    #[error("ペイロードを解釈できません: {0}")]
    InvalidPayload(String),
}

/// 正規化されたイベントの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// ブランチへの push → ロールアウト
    Push,
    /// ブランチの削除 → 撤去
    Remove,
}

/// 正規化されたイベント
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub target: DeployTarget,
    pub kind: HookKind,
}

pub struct GithubHook {
    secret: String,
    branch_whitelist: Vec<String>,
}

impl GithubHook {
    pub fn new(secret: impl Into<String>, branch_whitelist: Vec<String>) -> Self {
        Self {
            secret: secret.into(),
            branch_whitelist,
        }
    }

    /// ペイロードの署名を計算する: `sha1=<hex>`
    pub fn sign(&self, payload: &[u8]) -> Result<String, HookError> {
        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .map_err(|_| HookError::InvalidPayload("HMAC の初期化に失敗しました".to_string()))?;
        mac.update(payload);
        Ok(format!("sha1={}", hex::encode(mac.finalize().into_bytes())))
    }

    /// リクエストを検証して正規化する
    ///
    /// 署名不一致は致命的エラー。push 以外のイベント、タグの push、
    /// ホワイトリスト外のブランチは `Ok(None)`（何もしない）。
    pub fn parse(
        &self,
        event: Option<&str>,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<HookEvent>, HookError> {
        let expected = self.sign(payload)?;
        if signature != Some(expected.as_str()) {
            return Err(HookError::SignatureMismatch);
        }

        if event != Some("push") {
            debug!(event, "Ignoring non-push event");
            return Ok(None);
        }

        let payload: PushPayload = serde_json::from_slice(payload)
            .map_err(|e| HookError::InvalidPayload(e.to_string()))?;

        // タグの push はデプロイ対象にしない
        let Some(branch) = payload.git_ref.strip_prefix("refs/heads/") else {
            debug!(git_ref = %payload.git_ref, "Ignoring non-branch ref");
            return Ok(None);
        };

        if !self.branch_whitelist.is_empty()
            && !self.branch_whitelist.iter().any(|b| b == branch)
        {
            debug!(branch, "Branch not in whitelist, ignoring");
            return Ok(None);
        }

        let org = payload
            .repository
            .org_name()
            .ok_or_else(|| HookError::InvalidPayload("organization がありません".to_string()))?;

        let kind = if payload.deleted {
            HookKind::Remove
        } else {
            HookKind::Push
        };

        Ok(Some(HookEvent {
            target: DeployTarget::new(org, payload.repository.name, branch),
            kind,
        }))
    }
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    deleted: bool,
    repository: PushRepository,
}

#[derive(Deserialize)]
struct PushRepository {
    name: String,
    /// 文字列またはオブジェクト（API のバージョンで揺れる）
    #[serde(default)]
    organization: Option<serde_json::Value>,
    #[serde(default)]
    owner: Option<PushOwner>,
}

#[derive(Deserialize)]
struct PushOwner {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    login: Option<String>,
}

impl PushRepository {
    fn org_name(&self) -> Option<String> {
        if let Some(org) = &self.organization {
            if let Some(s) = org.as_str() {
                return Some(s.to_string());
            }
            if let Some(login) = org.get("login").and_then(|l| l.as_str()) {
                return Some(login.to_string());
            }
        }
        self.owner
            .as_ref()
            .and_then(|o| o.name.clone().or_else(|| o.login.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_payload(git_ref: &str, deleted: bool) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "ref": git_ref,
            "deleted": deleted,
            "repository": {
                "name": "api",
                "organization": "acme"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_sign_known_vector() {
        // 既知の HMAC-SHA1 テストベクタ
        let hook = GithubHook::new("key", vec![]);
        let signed = hook
            .sign(b"The quick brown fox jumps over the lazy dog")
            .unwrap();
        assert_eq!(signed, "sha1=de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9");
    }

    #[test]
    fn test_signature_mismatch_is_fatal() {
        let hook = GithubHook::new("s3cret", vec![]);
        let payload = push_payload("refs/heads/master", false);

        let result = hook.parse(Some("push"), Some("sha1=0000000000"), &payload);
        assert!(matches!(result, Err(HookError::SignatureMismatch)));

        let result = hook.parse(Some("push"), None, &payload);
        assert!(matches!(result, Err(HookError::SignatureMismatch)));
    }

    #[test]
    fn test_push_event_normalizes() {
        let hook = GithubHook::new("s3cret", vec![]);
        let payload = push_payload("refs/heads/feature/x", false);
        let signature = hook.sign(&payload).unwrap();

        let event = hook
            .parse(Some("push"), Some(signature.as_str()), &payload)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, HookKind::Push);
        assert_eq!(event.target.org, "acme");
        assert_eq!(event.target.repo, "api");
        assert_eq!(event.target.branch, "feature/x");
    }

    #[test]
    fn test_deleted_ref_is_remove() {
        let hook = GithubHook::new("s3cret", vec![]);
        let payload = push_payload("refs/heads/master", true);
        let signature = hook.sign(&payload).unwrap();

        let event = hook
            .parse(Some("push"), Some(signature.as_str()), &payload)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, HookKind::Remove);
    }

    #[test]
    fn test_tag_push_is_nothing_to_do() {
        let hook = GithubHook::new("s3cret", vec![]);
        let payload = push_payload("refs/tags/v1.0.0", false);
        let signature = hook.sign(&payload).unwrap();

        let event = hook.parse(Some("push"), Some(signature.as_str()), &payload).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_non_push_event_is_nothing_to_do() {
        let hook = GithubHook::new("s3cret", vec![]);
        let payload = push_payload("refs/heads/master", false);
        let signature = hook.sign(&payload).unwrap();

        let event = hook
            .parse(Some("issues"), Some(signature.as_str()), &payload)
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_branch_whitelist_filters() {
        let hook = GithubHook::new("s3cret", vec!["master".to_string()]);

        let payload = push_payload("refs/heads/master", false);
        let signature = hook.sign(&payload).unwrap();
        assert!(
            hook.parse(Some("push"), Some(signature.as_str()), &payload)
                .unwrap()
                .is_some()
        );

        let payload = push_payload("refs/heads/develop", false);
        let signature = hook.sign(&payload).unwrap();
        assert!(
            hook.parse(Some("push"), Some(signature.as_str()), &payload)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_org_from_owner_when_organization_missing() {
        let hook = GithubHook::new("s3cret", vec![]);
        let payload = serde_json::to_vec(&serde_json::json!({
            "ref": "refs/heads/master",
            "repository": {
                "name": "api",
                "owner": { "name": "acme" }
            }
        }))
        .unwrap();
        let signature = hook.sign(&payload).unwrap();

        let event = hook
            .parse(Some("push"), Some(signature.as_str()), &payload)
            .unwrap()
            .unwrap();
        assert_eq!(event.target.org, "acme");
    }
}
