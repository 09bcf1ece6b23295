//! ラベルベースのコンテナ・イメージ発見
//!
//! 起動時に付与した shipment ラベルでコンテナを探す。既存インスタンスの
//! 特定はラベルに加えてイメージファミリのプレフィックスで絞り込む
//! （ブランチ名の正規化衝突をタグ側の規則と揃えるため）。

use crate::error::Result;
use bollard::Docker;
use shipment_core::{LABEL_DEPLOY, LABEL_DEPLOY_VALUE, LABEL_REPO, image_family};
use std::collections::HashMap;
use tracing::debug;

/// 稼働中のデプロイ済みインスタンス
#[derive(Debug, Clone)]
pub struct RunningInstance {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
}

/// イメージの記録（タグとビルド時刻）
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: String,
    pub tag: String,
    pub created: i64,
}

impl RunningInstance {
    fn from_summary(summary: bollard::models::ContainerSummary) -> Self {
        Self {
            id: summary.id.unwrap_or_default(),
            name: summary
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: summary.image.unwrap_or_default(),
            labels: summary.labels.unwrap_or_default(),
        }
    }
}

async fn list_by_filters(
    docker: &Docker,
    filters: HashMap<String, Vec<String>>,
) -> Result<Vec<RunningInstance>> {
    #[allow(deprecated)]
    let options = bollard::container::ListContainersOptions::<String> {
        all: false,
        filters,
        ..Default::default()
    };

    #[allow(deprecated)]
    let containers = docker.list_containers(Some(options)).await?;
    Ok(containers
        .into_iter()
        .map(RunningInstance::from_summary)
        .collect())
}

/// あるリポジトリ・ブランチのデプロイ済みコンテナを探す
///
/// 入れ替え対象のスナップショットとして使う。ロック下で取得し、
/// 起動後に再取得はしない。
pub async fn find_deployed(
    docker: &Docker,
    repo: &str,
    safe_branch: &str,
) -> Result<Vec<RunningInstance>> {
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        vec![
            format!("{}={}", LABEL_DEPLOY, LABEL_DEPLOY_VALUE),
            format!("{}={}", LABEL_REPO, repo),
        ],
    );

    let prefix = format!("{}:", image_family(repo, safe_branch));
    let instances: Vec<RunningInstance> = list_by_filters(docker, filters)
        .await?
        .into_iter()
        .filter(|c| c.image.starts_with(&prefix))
        .collect();

    debug!(repo, safe_branch, count = instances.len(), "Found deployed containers");
    Ok(instances)
}

/// shipment がデプロイした全コンテナ（監視用）
pub async fn list_running(docker: &Docker) -> Result<Vec<RunningInstance>> {
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        vec![format!("{}={}", LABEL_DEPLOY, LABEL_DEPLOY_VALUE)],
    );
    list_by_filters(docker, filters).await
}

/// コンテナの詳細
pub async fn inspect(
    docker: &Docker,
    name: &str,
) -> Result<bollard::models::ContainerInspectResponse> {
    Ok(docker
        .inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>)
        .await?)
}

/// タグが prefix で始まるイメージを探す
///
/// prefix には `{repo}_{safe_branch}:`（ブランチ単位）や `{repo}_`
/// （リポジトリ全体）を渡す。
pub async fn find_images(docker: &Docker, prefix: &str) -> Result<Vec<ImageRecord>> {
    #[allow(deprecated)]
    let options = bollard::image::ListImagesOptions::<String> {
        all: false,
        ..Default::default()
    };

    #[allow(deprecated)]
    let images = docker.list_images(Some(options)).await?;

    let mut records = Vec::new();
    for image in images {
        for tag in &image.repo_tags {
            if tag.starts_with(prefix) {
                records.push(ImageRecord {
                    id: image.id.clone(),
                    tag: tag.clone(),
                    created: image.created,
                });
            }
        }
    }

    debug!(prefix, count = records.len(), "Found images");
    Ok(records)
}
