//! コンテナの停止・削除と古いイメージの整理

use crate::discovery::{self, ImageRecord};
use crate::error::Result;
use bollard::Docker;
use shipment_core::image_family;
use tracing::{debug, info};

/// 入れ替え時に残す世代数
pub const DEFAULT_KEEP_IMAGES: usize = 3;

/// コンテナを停止する。存在しない・停止済みは無視
pub async fn stop_containers(docker: &Docker, ids: &[String]) -> Result<()> {
    for id in ids {
        match docker
            .stop_container(id, None::<bollard::query_parameters::StopContainerOptions>)
            .await
        {
            Ok(_) => {
                debug!(id, "Stopped container");
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                // コンテナが存在しない場合は無視
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                // 既に停止中
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// コンテナを削除する。存在しないものは無視
pub async fn remove_containers(docker: &Docker, ids: &[String]) -> Result<()> {
    for id in ids {
        match docker
            .remove_container(
                id,
                Some(bollard::query_parameters::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => {
                debug!(id, "Removed container");
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// イメージを削除する。最初の失敗でエラーを返す（呼び出し側で警告扱い）
pub async fn remove_images(docker: &Docker, ids: &[String]) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for id in ids {
        docker
            .remove_image(
                id,
                Some(bollard::query_parameters::RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await?;
        debug!(id, "Removed image");
        removed.push(id.clone());
    }
    Ok(removed)
}

/// 保持対象から外れる古いイメージを選ぶ（作成時刻の新しい順に keep 件残す）
pub fn pick_stale(images: &[ImageRecord], keep: usize) -> Vec<ImageRecord> {
    let mut sorted = images.to_vec();
    sorted.sort_by(|a, b| b.created.cmp(&a.created));
    sorted.into_iter().skip(keep).collect()
}

/// あるイメージファミリの古い世代を削除する
///
/// 削除したタグの一覧を返す。失敗はエラーで返すが、ロールアウトでは
/// 警告として扱われ結果には影響しない。
pub async fn remove_stale_images(
    docker: &Docker,
    repo: &str,
    safe_branch: &str,
    keep: usize,
) -> Result<Vec<String>> {
    let prefix = format!("{}:", image_family(repo, safe_branch));
    let images = discovery::find_images(docker, &prefix).await?;
    let stale = pick_stale(&images, keep);

    if stale.is_empty() {
        return Ok(Vec::new());
    }

    info!(repo, safe_branch, count = stale.len(), "Removing stale images");
    let tags: Vec<String> = stale.iter().map(|i| i.tag.clone()).collect();
    remove_images(docker, &tags).await
}
