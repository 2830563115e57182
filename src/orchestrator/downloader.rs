use crate::core::error::{VodError, VodResult};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Stages remote media into a local directory before upload.
#[derive(Debug, Clone)]
pub struct Downloader {
    http_client: Client,
    save_dir: PathBuf,
}

impl Downloader {
    pub fn new(http_client: Client, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            http_client,
            save_dir: save_dir.into(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Same client, different target directory.
    pub fn with_save_dir(&self, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            http_client: self.http_client.clone(),
            save_dir: save_dir.into(),
        }
    }

    /// Downloads `download_url` to `<save_dir>/<local_file_name>`.
    ///
    /// When `expected_size` is given and a non-empty file of exactly that size
    /// already exists at the target, it is returned as is without touching the
    /// network. This only compares sizes, not content.
    ///
    /// The caller owns the returned file and deletes it after use; nothing is
    /// cleaned up on failure.
    pub async fn download_file(
        &self,
        download_url: &str,
        local_file_name: &str,
        expected_size: Option<u64>,
    ) -> VodResult<PathBuf> {
        let local_path = self.save_dir.join(local_file_name);
        tracing::info!(url = %download_url, path = %local_path.display(), "Download");

        if let Some(expected) = expected_size {
            if let Ok(meta) = fs::metadata(&local_path).await {
                if meta.len() > 0 && meta.len() == expected {
                    tracing::debug!(path = %local_path.display(), "already downloaded");
                    return Ok(local_path);
                }
            }
        }

        fs::create_dir_all(&self.save_dir).await.map_err(|e| {
            VodError::FileDownload(format!(
                "download file fail while creating {}: {}",
                self.save_dir.display(),
                e
            ))
        })?;

        let mut response = self
            .http_client
            .get(download_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                VodError::FileDownload(format!(
                    "download file fail while reading {}: {}",
                    download_url, e
                ))
            })?;

        let write_error = |e: std::io::Error| {
            VodError::FileDownload(format!(
                "download file fail while writing {}: {}",
                local_path.display(),
                e
            ))
        };
        let mut file = File::create(&local_path).await.map_err(write_error)?;

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            VodError::FileDownload(format!(
                "download file fail while reading {}: {}",
                download_url, e
            ))
        })? {
            file.write_all(&chunk).await.map_err(write_error)?;
            total_bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        tracing::info!(path = %local_path.display(), total_bytes, "Download finished");
        Ok(local_path)
    }
}
