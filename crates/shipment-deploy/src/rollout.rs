//! ロールアウト
//!
//! ロック取得 → fetch → {記述子解決, ビルド, 既存コンテナ列挙,
//! バーチャルホスト解決} → 起動 → (猶予) → 旧停止 → 旧削除 →
//! イメージ世代整理、の順で実行する。途中で失敗しても起動済みの
//! コンテナは巻き戻さない（エラーを返し、ロックは必ず解放する）。

use crate::deployer::{Deployer, flatten_graph_error};
use crate::error::{DeployError, Result};
use crate::host::compose_virtual_host;
use crate::result::RolloutResult;
use bollard::Docker;
use shipment_container::{ImageBuilder, Launched, RunningInstance};
use shipment_core::{CoreError, DeployConfig, DeployTarget, TaskGraph, image_tag, resolve_config};
use shipment_source::Workdir;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// ロールアウト要求
pub struct RolloutRequest {
    pub target: DeployTarget,
    /// 記述子ファイル名の上書き（未指定ならデーモンのデフォルト）
    pub config_file: Option<String>,
}

/// グラフ全ステップが共有する結果アキュムレータ
struct RolloutCtx {
    target: DeployTarget,
    env: String,
    config_file: String,
    shared_config_path: Option<PathBuf>,
    root_domain: Option<String>,
    workdir: Arc<Workdir>,
    docker: Docker,

    commit: OnceLock<String>,
    config: OnceLock<DeployConfig>,
    existing: OnceLock<Vec<RunningInstance>>,
    virtual_host: OnceLock<Option<String>>,
    launched: OnceLock<Vec<Launched>>,
}

impl RolloutCtx {
    fn label(&self) -> String {
        self.target.to_string()
    }

    fn commit(&self) -> Result<&str> {
        self.commit
            .get()
            .map(|s| s.as_str())
            .ok_or(DeployError::MissingStepResult("fetch"))
    }

    fn config(&self) -> Result<&DeployConfig> {
        self.config
            .get()
            .ok_or(DeployError::MissingStepResult("config"))
    }

    fn existing(&self) -> Result<&[RunningInstance]> {
        self.existing
            .get()
            .map(|v| v.as_slice())
            .ok_or(DeployError::MissingStepResult("existing"))
    }

    fn virtual_host(&self) -> Result<Option<&str>> {
        self.virtual_host
            .get()
            .map(|h| h.as_deref())
            .ok_or(DeployError::MissingStepResult("host"))
    }

    fn launched(&self) -> Result<&[Launched]> {
        self.launched
            .get()
            .map(|v| v.as_slice())
            .ok_or(DeployError::MissingStepResult("run"))
    }

    fn existing_ids(&self) -> Result<Vec<String>> {
        Ok(self.existing()?.iter().map(|c| c.id.clone()).collect())
    }
}

impl Deployer {
    /// ロールアウトを実行する
    pub async fn run(&self, req: RolloutRequest) -> Result<RolloutResult> {
        let started = Instant::now();
        let target = req.target;
        info!(%target, "Starting deployment");

        let _guard = self
            .lock
            .acquire(&target.org, &target.repo)
            .await
            .map_err(|e| match e {
                CoreError::LockTimeout { org, repo, .. } => DeployError::LockTimeout { org, repo },
                other => DeployError::Graph(other.to_string()),
            })?;

        let ctx = Arc::new(RolloutCtx {
            target: target.clone(),
            env: self.env.clone(),
            config_file: req.config_file.unwrap_or_else(|| self.config_file.clone()),
            shared_config_path: self.shared_config_path.clone(),
            root_domain: self.root_domain.clone(),
            workdir: Arc::clone(&self.workdir),
            docker: self.docker.clone(),
            commit: OnceLock::new(),
            config: OnceLock::new(),
            existing: OnceLock::new(),
            virtual_host: OnceLock::new(),
            launched: OnceLock::new(),
        });

        let graph: TaskGraph<RolloutCtx, DeployError> = TaskGraph::new()
            .step("fetch", &[], |ctx: Arc<RolloutCtx>| async move {
                info!(target = %ctx.target, "Fetching latest");
                let commit = ctx
                    .workdir
                    .fetch_latest(&ctx.target.org, &ctx.target.repo, &ctx.target.branch)
                    .await
                    .map_err(|e| DeployError::SourceFetch {
                        target: ctx.label(),
                        source: e,
                    })?;
                let _ = ctx.commit.set(commit);
                Ok(())
            })
            .step("config", &["fetch"], |ctx: Arc<RolloutCtx>| async move {
                info!(target = %ctx.target, config_file = %ctx.config_file, "Reading deploy descriptor");
                let config = resolve_config(
                    ctx.workdir.root(),
                    ctx.shared_config_path.as_deref(),
                    &ctx.config_file,
                    &ctx.target,
                    &ctx.env,
                )
                .map_err(|e| DeployError::Config {
                    target: ctx.label(),
                    source: e,
                })?;
                let _ = ctx.config.set(config);
                Ok(())
            })
            .step("existing", &["fetch"], |ctx: Arc<RolloutCtx>| async move {
                let existing = shipment_container::find_deployed(
                    &ctx.docker,
                    &ctx.target.repo,
                    &ctx.target.safe_branch(),
                )
                .await
                .map_err(|e| DeployError::Container {
                    target: ctx.label(),
                    source: e,
                })?;
                let _ = ctx.existing.set(existing);
                Ok(())
            })
            .step("host", &["config"], |ctx: Arc<RolloutCtx>| async move {
                let host =
                    compose_virtual_host(ctx.config()?, &ctx.target, ctx.root_domain.as_deref());
                let _ = ctx.virtual_host.set(host);
                Ok(())
            })
            .step("build", &["config"], |ctx: Arc<RolloutCtx>| async move {
                let dockerfile = ctx.config()?.dockerfile.clone();
                let tag = image_tag(&ctx.target.repo, &ctx.target.safe_branch(), ctx.commit()?);
                info!(target = %ctx.target, %tag, "Building");
                ImageBuilder::new(ctx.docker.clone())
                    .ensure_image(
                        &ctx.workdir.checkout_path(&ctx.target.repo),
                        &dockerfile,
                        &tag,
                    )
                    .await
                    .map_err(|e| DeployError::Build {
                        target: ctx.label(),
                        source: e,
                    })?;
                Ok(())
            })
            .step(
                "run",
                &["config", "build", "existing", "host"],
                |ctx: Arc<RolloutCtx>| async move {
                    let config = ctx.config()?;
                    let args = shipment_container::merge_runtime_args(
                        &config.docker_args,
                        &ctx.target,
                        ctx.virtual_host()?,
                    );
                    let scale = config.scale.for_env(&ctx.env);
                    let tag =
                        image_tag(&ctx.target.repo, &ctx.target.safe_branch(), ctx.commit()?);
                    info!(target = %ctx.target, scale, "Running containers");
                    let launched = shipment_container::launch_replicas(
                        &ctx.docker,
                        &ctx.target,
                        &tag,
                        &args,
                        scale,
                    )
                    .await
                    .map_err(|e| DeployError::Launch {
                        target: ctx.label(),
                        source: e,
                    })?;
                    let _ = ctx.launched.set(launched);
                    Ok(())
                },
            )
            .step("wait", &["run"], |ctx: Arc<RolloutCtx>| async move {
                let wait = ctx.config()?.wait;
                if wait > 0 {
                    info!(target = %ctx.target, wait, "Waiting before stopping old containers");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                Ok(())
            })
            .step("stop_old", &["wait"], |ctx: Arc<RolloutCtx>| async move {
                let ids = ctx.existing_ids()?;
                if !ids.is_empty() {
                    info!(target = %ctx.target, count = ids.len(), "Stopping old containers");
                }
                shipment_container::cleanup::stop_containers(&ctx.docker, &ids)
                    .await
                    .map_err(|e| DeployError::Container {
                        target: ctx.label(),
                        source: e,
                    })?;
                Ok(())
            })
            .step("rm_old", &["stop_old"], |ctx: Arc<RolloutCtx>| async move {
                let ids = ctx.existing_ids()?;
                if !ids.is_empty() {
                    info!(target = %ctx.target, count = ids.len(), "Removing old containers");
                }
                shipment_container::cleanup::remove_containers(&ctx.docker, &ids)
                    .await
                    .map_err(|e| DeployError::Container {
                        target: ctx.label(),
                        source: e,
                    })?;
                Ok(())
            })
            .step("prune", &["rm_old"], |ctx: Arc<RolloutCtx>| async move {
                // 世代整理は結果に影響させない（警告のみ）
                match shipment_container::remove_stale_images(
                    &ctx.docker,
                    &ctx.target.repo,
                    &ctx.target.safe_branch(),
                    shipment_container::DEFAULT_KEEP_IMAGES,
                )
                .await
                {
                    Ok(removed) if !removed.is_empty() => {
                        info!(target = %ctx.target, count = removed.len(), "Removed stale images");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target = %ctx.target, error = %e, "Issue removing stale images");
                    }
                }
                Ok(())
            });

        if let Err(e) = graph.run(Arc::clone(&ctx)).await {
            let e = flatten_graph_error(e);
            error!(%target, error = %e, "Deployment failed");
            return Err(e);
        }

        let config = ctx.config()?;
        let host = ctx.virtual_host()?.map(str::to_string);
        let launched = ctx.launched()?;

        let result = RolloutResult {
            message: format!("{}: Successfully Deployed", target),
            url: host.as_ref().map(|h| format!("http://{}", h)),
            ids: launched.iter().map(|l| l.id.clone()).collect(),
            names: launched.iter().map(|l| l.name.clone()).collect(),
            stopped_containers: ctx.existing_ids()?,
            duration_ms: started.elapsed().as_millis() as u64,
            docker_args: shipment_container::merge_runtime_args(
                &config.docker_args,
                &target,
                host.as_deref(),
            ),
        };

        info!(%target, duration_ms = result.duration_ms, "Successfully deployed");
        Ok(result)
    }
}
