//! デプロイロック
//!
//! `(org, repo)` 単位の排他制御。同一リポジトリはブランチが違っても
//! チェックアウトディレクトリを共有するため、ブランチはキーに含めない
//! （スループット上の既知の制限）。プロセス内のみ有効で、再起動で
//! リセットされる。

use crate::error::{CoreError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// プロセス全体で共有するロックテーブル
#[derive(Debug)]
pub struct DeployLock {
    busy: Mutex<HashSet<String>>,
    released: Notify,
    retry_interval: Duration,
    max_attempts: u32,
}

impl DeployLock {
    pub fn new() -> Self {
        Self::with_retry(DEFAULT_RETRY_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_retry(retry_interval: Duration, max_attempts: u32) -> Self {
        Self {
            busy: Mutex::new(HashSet::new()),
            released: Notify::new(),
            retry_interval,
            max_attempts,
        }
    }

    /// 待たずに取得を試みる
    pub fn try_acquire(self: &Arc<Self>, org: &str, repo: &str) -> Option<LockGuard> {
        let key = format!("{}_{}", org, repo);
        self.try_key(key)
    }

    /// ロックを取得する。対象が使用中なら解放通知を待つ
    ///
    /// 待機は `retry_interval` ごとに最大 `max_attempts` 回まで。超えたら
    /// [`CoreError::LockTimeout`]。返されたガードのドロップで必ず解放される。
    pub async fn acquire(self: &Arc<Self>, org: &str, repo: &str) -> Result<LockGuard> {
        let key = format!("{}_{}", org, repo);
        let mut attempts = 0u32;

        loop {
            if let Some(guard) = self.try_key(key.clone()) {
                return Ok(guard);
            }

            if attempts >= self.max_attempts {
                warn!(org, repo, attempts, "Max retries waiting for deployment to finish");
                return Err(CoreError::LockTimeout {
                    org: org.to_string(),
                    repo: repo.to_string(),
                    attempts,
                });
            }
            attempts += 1;
            info!(org, repo, attempt = attempts, "Waiting for existing deployment to finish");

            let released = self.released.notified();
            // 通知の購読後にもう一度確認しないと解放を取りこぼす
            if let Some(guard) = self.try_key(key.clone()) {
                return Ok(guard);
            }
            let _ = tokio::time::timeout(self.retry_interval, released).await;
        }
    }

    fn try_key(self: &Arc<Self>, key: String) -> Option<LockGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if busy.contains(&key) {
            return None;
        }
        busy.insert(key.clone());
        Some(LockGuard {
            lock: Arc::clone(self),
            key,
        })
    }
}

impl Default for DeployLock {
    fn default() -> Self {
        Self::new()
    }
}

/// 取得済みロック。ドロップで解放し、待機中のタスクへ通知する
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<DeployLock>,
    key: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut busy = self
            .lock
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        busy.remove(&self.key);
        drop(busy);
        self.lock.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let lock = Arc::new(DeployLock::new());

        let guard = lock.acquire("acme", "api").await.unwrap();
        assert!(lock.try_acquire("acme", "api").is_none());

        drop(guard);
        assert!(lock.try_acquire("acme", "api").is_some());
    }

    #[tokio::test]
    async fn test_different_repos_do_not_contend() {
        let lock = Arc::new(DeployLock::new());

        let _api = lock.acquire("acme", "api").await.unwrap();
        let _web = lock.acquire("acme", "web").await.unwrap();
        let _other_org = lock.acquire("globex", "api").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_times_out() {
        let lock = Arc::new(DeployLock::with_retry(Duration::from_secs(10), 3));

        let _guard = lock.acquire("acme", "api").await.unwrap();

        let err = lock.acquire("acme", "api").await.unwrap_err();
        match err {
            CoreError::LockTimeout { org, repo, attempts } => {
                assert_eq!(org, "acme");
                assert_eq!(repo, "api");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_proceeds_after_release() {
        let lock = Arc::new(DeployLock::with_retry(Duration::from_secs(10), 10));

        let guard = lock.acquire("acme", "api").await.unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire("acme", "api").await })
        };

        // 待機側が確実に待ちに入ってから解放する
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(guard);

        let acquired = waiter.await.unwrap();
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_guard_released_on_error_path() {
        let lock = Arc::new(DeployLock::new());

        let result: std::result::Result<(), &str> = async {
            let _guard = lock.acquire("acme", "api").await.map_err(|_| "lock")?;
            Err("operation failed")
        }
        .await;
        assert!(result.is_err());

        // 失敗してもロックは残らない
        assert!(lock.try_acquire("acme", "api").is_some());
    }
}
