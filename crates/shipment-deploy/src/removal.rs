//! 撤去
//!
//! ロック取得 → チェックアウト存在確認 → {コンテナ列挙, イメージ列挙}
//! → 停止 → コンテナ削除 → イメージ削除（警告のみ）→ リポジトリの
//! イメージが全ブランチで無くなればチェックアウトも削除する。

use crate::deployer::{Deployer, flatten_graph_error};
use crate::error::{DeployError, Result};
use crate::result::RemovalResult;
use bollard::Docker;
use shipment_container::{ImageRecord, RunningInstance};
use shipment_core::{CoreError, DeployTarget, TaskGraph, image_family};
use shipment_source::Workdir;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{error, info, warn};

struct RemovalCtx {
    target: DeployTarget,
    workdir: Arc<Workdir>,
    docker: Docker,

    containers: OnceLock<Vec<RunningInstance>>,
    images: OnceLock<Vec<ImageRecord>>,
    removed_images: OnceLock<Vec<String>>,
    checkout_removed: OnceLock<bool>,
}

impl RemovalCtx {
    fn label(&self) -> String {
        self.target.to_string()
    }

    fn containers(&self) -> Result<&[RunningInstance]> {
        self.containers
            .get()
            .map(|v| v.as_slice())
            .ok_or(DeployError::MissingStepResult("containers"))
    }

    fn container_ids(&self) -> Result<Vec<String>> {
        Ok(self.containers()?.iter().map(|c| c.id.clone()).collect())
    }

    fn images(&self) -> Result<&[ImageRecord]> {
        self.images
            .get()
            .map(|v| v.as_slice())
            .ok_or(DeployError::MissingStepResult("images"))
    }
}

impl Deployer {
    /// あるリポジトリ・ブランチのデプロイを撤去する
    pub async fn remove(&self, target: DeployTarget) -> Result<RemovalResult> {
        let started = Instant::now();
        info!(%target, "Starting removal");

        let _guard = self
            .lock
            .acquire(&target.org, &target.repo)
            .await
            .map_err(|e| match e {
                CoreError::LockTimeout { org, repo, .. } => DeployError::LockTimeout { org, repo },
                other => DeployError::Graph(other.to_string()),
            })?;

        let ctx = Arc::new(RemovalCtx {
            target: target.clone(),
            workdir: Arc::clone(&self.workdir),
            docker: self.docker.clone(),
            containers: OnceLock::new(),
            images: OnceLock::new(),
            removed_images: OnceLock::new(),
            checkout_removed: OnceLock::new(),
        });

        let graph: TaskGraph<RemovalCtx, DeployError> = TaskGraph::new()
            .step("exists", &[], |ctx: Arc<RemovalCtx>| async move {
                if !ctx.workdir.exists(&ctx.target.repo).await {
                    return Err(DeployError::NotFound {
                        repo: ctx.target.repo.clone(),
                    });
                }
                Ok(())
            })
            .step("containers", &["exists"], |ctx: Arc<RemovalCtx>| async move {
                info!(target = %ctx.target, "Getting containers");
                let containers = shipment_container::find_deployed(
                    &ctx.docker,
                    &ctx.target.repo,
                    &ctx.target.safe_branch(),
                )
                .await
                .map_err(|e| DeployError::Container {
                    target: ctx.label(),
                    source: e,
                })?;
                let _ = ctx.containers.set(containers);
                Ok(())
            })
            .step("images", &["exists"], |ctx: Arc<RemovalCtx>| async move {
                info!(target = %ctx.target, "Getting images");
                let prefix = format!(
                    "{}:",
                    image_family(&ctx.target.repo, &ctx.target.safe_branch())
                );
                let images = shipment_container::find_images(&ctx.docker, &prefix)
                    .await
                    .map_err(|e| DeployError::Container {
                        target: ctx.label(),
                        source: e,
                    })?;
                let _ = ctx.images.set(images);
                Ok(())
            })
            .step("stop", &["containers"], |ctx: Arc<RemovalCtx>| async move {
                let ids = ctx.container_ids()?;
                if !ids.is_empty() {
                    info!(target = %ctx.target, count = ids.len(), "Stopping containers");
                }
                shipment_container::cleanup::stop_containers(&ctx.docker, &ids)
                    .await
                    .map_err(|e| DeployError::Container {
                        target: ctx.label(),
                        source: e,
                    })?;
                Ok(())
            })
            .step("rm", &["stop"], |ctx: Arc<RemovalCtx>| async move {
                let ids = ctx.container_ids()?;
                if !ids.is_empty() {
                    info!(target = %ctx.target, count = ids.len(), "Removing containers");
                }
                shipment_container::cleanup::remove_containers(&ctx.docker, &ids)
                    .await
                    .map_err(|e| DeployError::Container {
                        target: ctx.label(),
                        source: e,
                    })?;
                Ok(())
            })
            .step("rmi", &["rm", "images"], |ctx: Arc<RemovalCtx>| async move {
                let tags: Vec<String> = ctx.images()?.iter().map(|i| i.tag.clone()).collect();
                if !tags.is_empty() {
                    info!(target = %ctx.target, count = tags.len(), "Removing images");
                }
                // イメージ削除の失敗は警告のみ
                let removed =
                    match shipment_container::cleanup::remove_images(&ctx.docker, &tags).await {
                        Ok(removed) => removed,
                        Err(e) => {
                            warn!(target = %ctx.target, error = %e, "Issue removing images");
                            Vec::new()
                        }
                    };
                let _ = ctx.removed_images.set(removed);
                Ok(())
            })
            .step("checkout", &["rmi"], |ctx: Arc<RemovalCtx>| async move {
                // 他ブランチのイメージが残っていればチェックアウトは残す
                let prefix = format!("{}_", ctx.target.repo);
                let remaining = shipment_container::find_images(&ctx.docker, &prefix)
                    .await
                    .map_err(|e| DeployError::Container {
                        target: ctx.label(),
                        source: e,
                    })?;

                if remaining.is_empty() {
                    info!(target = %ctx.target, "Removing checkout");
                    ctx.workdir
                        .remove(&ctx.target.repo)
                        .await
                        .map_err(|e| DeployError::SourceFetch {
                            target: ctx.label(),
                            source: e,
                        })?;
                    let _ = ctx.checkout_removed.set(true);
                } else {
                    let _ = ctx.checkout_removed.set(false);
                }
                Ok(())
            });

        if let Err(e) = graph.run(Arc::clone(&ctx)).await {
            let e = flatten_graph_error(e);
            error!(%target, error = %e, "Removal failed");
            return Err(e);
        }

        let result = RemovalResult {
            message: format!("{}: Successfully Removed", target),
            stopped_containers: ctx.container_ids()?,
            removed_images: ctx.removed_images.get().cloned().unwrap_or_default(),
            checkout_removed: ctx.checkout_removed.get().copied().unwrap_or(false),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(%target, duration_ms = result.duration_ms, "Successfully removed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::DeployerOptions;

    fn deployer(repo_root: std::path::PathBuf) -> Deployer {
        let docker = Docker::connect_with_local_defaults().unwrap();
        Deployer::new(
            DeployerOptions {
                repo_root,
                shared_config_path: None,
                username: "bot".to_string(),
                token: "t0ken".to_string(),
                env: "production".to_string(),
                root_domain: None,
                config_file: "shipment.json".to_string(),
            },
            docker,
        )
    }

    #[tokio::test]
    async fn test_remove_missing_checkout_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let deployer = deployer(root.path().to_path_buf());

        let err = deployer
            .remove(DeployTarget::new("acme", "api", "master"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_removal() {
        let root = tempfile::tempdir().unwrap();
        let deployer = deployer(root.path().to_path_buf());
        let target = DeployTarget::new("acme", "api", "master");

        // 1 回目が失敗してもロックは解放され、2 回目も即座に
        // NotFound になる（LockTimeout にはならない）
        let first = deployer.remove(target.clone()).await.unwrap_err();
        assert!(matches!(first, DeployError::NotFound { .. }));

        let second = deployer.remove(target).await.unwrap_err();
        assert!(matches!(second, DeployError::NotFound { .. }));
    }
}
