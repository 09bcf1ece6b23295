use crate::context::ContextBuilder;
use crate::error::{ContainerError, Result};
use bollard::Docker;
use bollard::image::BuildImageOptions;
use futures_util::stream::StreamExt;
use std::path::Path;

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージの存在確認
    pub async fn image_exists(&self, image_tag: &str) -> Result<bool> {
        match self.docker.inspect_image(image_tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::Docker(e)),
        }
    }

    /// タグのイメージが無ければビルドする
    ///
    /// 同一コミットの再トリガーやリトライを安価にするため、タグが既に
    /// 存在すればビルドをスキップする。ビルドしたら true を返す。
    pub async fn ensure_image(
        &self,
        context_dir: &Path,
        dockerfile: &str,
        tag: &str,
    ) -> Result<bool> {
        if self.image_exists(tag).await? {
            tracing::info!(tag, "Image already exists, skipping build");
            return Ok(false);
        }

        let dockerfile_path = context_dir.join(dockerfile);
        if !dockerfile_path.exists() {
            return Err(ContainerError::DockerfileNotFound(dockerfile_path));
        }

        let context_data = ContextBuilder::create_context(context_dir, &dockerfile_path)?;
        self.build(context_data, tag).await?;
        Ok(true)
    }

    /// イメージをビルド
    async fn build(&self, context_data: Vec<u8>, tag: &str) -> Result<()> {
        tracing::info!(tag, "Building image");

        #[allow(deprecated)]
        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            rm: true,     // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            ..Default::default()
        };

        // ビルドストリームの開始
        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let context_bytes = Bytes::from(context_data);
        let body = Full::new(context_bytes);
        #[allow(deprecated)]
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(output) => {
                    Self::handle_build_output(output)?;
                }
                Err(e) => {
                    return Err(ContainerError::Docker(e));
                }
            }
        }

        tracing::info!(tag, "Successfully built");
        Ok(())
    }

    /// ビルド出力の処理
    fn handle_build_output(output: bollard::models::BuildInfo) -> Result<()> {
        if let Some(stream) = output.stream {
            // ビルドステップの出力
            tracing::debug!("{}", stream.trim_end());
        }

        if let Some(error) = output.error {
            return Err(ContainerError::BuildFailed(error));
        }

        if let Some(error_detail) = output.error_detail {
            let error_msg = error_detail
                .message
                .unwrap_or_else(|| "Unknown build error".to_string());
            return Err(ContainerError::BuildFailed(error_msg));
        }

        Ok(())
    }
}
