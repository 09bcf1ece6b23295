use crate::error::{ContainerError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::Builder;

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// チェックアウト全体を追加したうえで、指定された Dockerfile を
    /// "Dockerfile" という名前で入れ直す（パス指定の Dockerfile 対応）。
    pub fn create_context(context_path: &Path, dockerfile_path: &Path) -> Result<Vec<u8>> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            // コンテキストディレクトリを再帰的に追加
            tar.append_dir_all(".", context_path)
                .map_err(ContainerError::Io)?;

            // Dockerfileを "Dockerfile" として追加
            let mut dockerfile_file = File::open(dockerfile_path)?;
            let mut dockerfile_content = Vec::new();
            dockerfile_file.read_to_end(&mut dockerfile_content)?;

            let mut header = tar::Header::new_gnu();
            header.set_path("Dockerfile").map_err(ContainerError::Io)?;
            header.set_size(dockerfile_content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();

            tar.append(&header, &dockerfile_content[..])
                .map_err(ContainerError::Io)?;

            tar.finish().map_err(ContainerError::Io)?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        Ok(archive_data)
    }
}
