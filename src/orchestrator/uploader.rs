//! Upload orchestration.
//!
//! An [`Uploader`] mints upload credentials, stages remote sources locally and
//! moves each file into object storage, one request at a time. Parts of a
//! multipart upload are sent strictly in order.

use crate::core::config::UploaderConfig;
use crate::core::error::{VodError, VodResult};
use crate::core::request::{
    MediaRequest, UploadAttachedMediaRequest, UploadImageRequest, UploadVideoRequest,
};
use crate::core::s3_client::{
    CompletedPartInfo, S3Connector, StorageClient, StorageConnector, UploadHeaders,
};
use crate::core::upload_info::{MediaType, UploadInfo};
use crate::core::vod_client::{HttpVodApi, RequestSigner, VodApi};
use crate::orchestrator::downloader::Downloader;
use crate::orchestrator::playlist::{Playlist, Slice};
use crate::orchestrator::report::{
    ProgressRecord, ProgressReporter, TelemetryReporter, UploadMethod, UploadPoint,
    generate_file_part_hash,
};
use crate::utils::hash::md5_hex;
use crate::utils::path::{base_name, get_file_name};
use crate::utils::urls::is_web_url;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;

pub const OSS_NOTIFICATION_HEADER: &str = "x-oss-notification";

/// Called with `(media_id, uploaded_bytes, total_bytes)` after every part and
/// after a whole-file upload.
pub type ProgressCallback = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

pub fn log_upload_progress(media_id: &str, consumed_bytes: u64, total_bytes: u64) {
    let rate = if total_bytes > 0 {
        100.0 * consumed_bytes as f64 / total_bytes as f64
    } else {
        0.0
    };
    tracing::info!(
        media_id,
        consumed_bytes,
        "UploadProgress {:.1}%",
        rate
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUploadResult {
    pub image_id: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedMediaUploadResult {
    pub media_id: String,
    pub media_url: Option<String>,
    pub file_url: Option<String>,
}

/// Upload info together with a storage client bound to its credentials.
pub struct UploadSession {
    pub info: UploadInfo,
    storage: Arc<dyn StorageClient>,
    minted_at: Instant,
}

impl UploadSession {
    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    pub fn credentials_age(&self) -> std::time::Duration {
        self.minted_at.elapsed()
    }
}

/// Storage notification header toggling the watermark, only present when
/// the request disabled it.
pub fn upload_headers(request: &UploadVideoRequest) -> Option<UploadHeaders> {
    let switch = request.watermark_switch()?;
    let user_data = format!(
        r#"{{"Vod":{{"UserData":{{"IsShowWaterMark": "{}"}}}}}}"#,
        switch
    );
    let mut headers = UploadHeaders::new();
    headers.insert(
        OSS_NOTIFICATION_HEADER.to_string(),
        STANDARD.encode(user_data),
    );
    Some(headers)
}

pub struct Uploader {
    config: UploaderConfig,
    vod_api: Arc<dyn VodApi>,
    connector: Arc<dyn StorageConnector>,
    reporter: Arc<dyn ProgressReporter>,
    http_client: Client,
    downloader: Downloader,
    progress_callback: ProgressCallback,
}

impl Uploader {
    /// Default stack: reqwest control-plane client signed by `signer`,
    /// aws-sdk-s3 storage and VoD telemetry.
    pub fn new(config: UploaderConfig, signer: Arc<dyn RequestSigner>) -> VodResult<Self> {
        config.validate()?;
        let vod_api = Arc::new(HttpVodApi::new(&config, signer)?);
        let connector = Arc::new(S3Connector::from_config(&config));
        let reporter = Arc::new(
            TelemetryReporter::new(&config.access_key_id, config.enable_ssl)
                .map_err(|e| VodError::Client(e.to_string()))?,
        );
        Self::with_collaborators(config, vod_api, connector, reporter)
    }

    pub fn with_collaborators(
        config: UploaderConfig,
        vod_api: Arc<dyn VodApi>,
        connector: Arc<dyn StorageConnector>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> VodResult<Self> {
        config.validate()?;
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| VodError::Client(e.to_string()))?;
        let downloader = Downloader::new(http_client.clone(), config.save_dir.clone());

        Ok(Self {
            config,
            vod_api,
            connector,
            reporter,
            http_client,
            downloader,
            progress_callback: Arc::new(log_upload_progress),
        })
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str, u64, u64) + Send + Sync + 'static,
    {
        self.progress_callback = Arc::new(callback);
    }

    /// Uploads a local video or audio file and returns the video id.
    pub async fn upload_local_video(&self, request: &UploadVideoRequest) -> VodResult<String> {
        let info = self.create_upload_video(request).await?;
        let headers = upload_headers(request);
        let object_key = info.upload_address.file_name.clone();
        let session = self.open_session(info)?;
        let session = self
            .upload_object(
                Path::new(request.file_path()),
                &object_key,
                session,
                headers.as_ref(),
            )
            .await?;
        Ok(session.info.media_id)
    }

    /// Downloads a remote video into the save directory, uploads it and
    /// removes the local copy.
    pub async fn upload_web_video(&self, request: &UploadVideoRequest) -> VodResult<String> {
        let (staged, local_path) = self.download_web_media(request).await?;
        let video_id = self.upload_local_video(&staged).await?;
        self.remove_local_file(&local_path).await;
        Ok(video_id)
    }

    pub async fn upload_local_image(
        &self,
        request: &UploadImageRequest,
    ) -> VodResult<ImageUploadResult> {
        let info = self.create_upload_image(request).await?;
        let object_key = info.upload_address.file_name.clone();
        let session = self.open_session(info)?;
        let session = self
            .upload_object(Path::new(request.file_path()), &object_key, session, None)
            .await?;

        Ok(ImageUploadResult {
            image_id: session.info.media_id,
            image_url: session.info.media_url,
        })
    }

    pub async fn upload_web_image(
        &self,
        request: &UploadImageRequest,
    ) -> VodResult<ImageUploadResult> {
        let (staged, local_path) = self.download_web_media(request).await?;
        let result = self.upload_local_image(&staged).await?;
        self.remove_local_file(&local_path).await;
        Ok(result)
    }

    pub async fn upload_local_attached_media(
        &self,
        request: &UploadAttachedMediaRequest,
    ) -> VodResult<AttachedMediaUploadResult> {
        let info = self.create_upload_attached_media(request).await?;
        let object_key = info.upload_address.file_name.clone();
        let session = self.open_session(info)?;
        let session = self
            .upload_object(Path::new(request.file_path()), &object_key, session, None)
            .await?;

        Ok(AttachedMediaUploadResult {
            media_id: session.info.media_id,
            media_url: session.info.media_url,
            file_url: session.info.file_url,
        })
    }

    pub async fn upload_web_attached_media(
        &self,
        request: &UploadAttachedMediaRequest,
    ) -> VodResult<AttachedMediaUploadResult> {
        let (staged, local_path) = self.download_web_media(request).await?;
        let result = self.upload_local_attached_media(&staged).await?;
        self.remove_local_file(&local_path).await;
        Ok(result)
    }

    /// Uploads a local m3u8 playlist and its segments.
    ///
    /// Segments come from `slice_files` when given, otherwise they are
    /// resolved next to the playlist. The uploaded playlist is a rewritten copy
    /// whose segment references are bare file names.
    pub async fn upload_local_m3u8(
        &self,
        request: &UploadVideoRequest,
        slice_files: Option<&[String]>,
    ) -> VodResult<String> {
        let slice_files = match slice_files {
            Some(files) => files.to_vec(),
            None => self.parse_m3u8_file(request.file_path()).await?,
        };
        if slice_files.is_empty() {
            return Err(VodError::InvalidParameter(
                "m3u8 slice files invalid".to_string(),
            ));
        }
        let slices = slice_files
            .iter()
            .map(|source| Slice::from_source(source))
            .collect::<Vec<_>>();

        let (_, playlist_path) = self.m3u8_local_path(request);
        self.rewrite_m3u8_file(request.file_path(), &playlist_path)
            .await?;

        let video_id = self
            .upload_m3u8_slices(request, &playlist_path, &slices)
            .await?;
        self.remove_local_file(&playlist_path).await;
        Ok(video_id)
    }

    /// Downloads a remote m3u8 playlist and its segments, then uploads them.
    /// Segment URLs default to the playlist's own references.
    pub async fn upload_web_m3u8(
        &self,
        request: &UploadVideoRequest,
        slice_file_urls: Option<&[String]>,
    ) -> VodResult<String> {
        let slice_file_urls = match slice_file_urls {
            Some(urls) => urls.to_vec(),
            None => self.parse_m3u8_file(request.file_path()).await?,
        };
        if slice_file_urls.is_empty() {
            return Err(VodError::InvalidParameter(
                "m3u8 slice files invalid".to_string(),
            ));
        }

        let (playlist_dir, playlist_path) = self.m3u8_local_path(request);
        self.rewrite_m3u8_file(request.file_path(), &playlist_path)
            .await?;

        let downloader = self.downloader.with_save_dir(&playlist_dir);
        let mut slices = Vec::with_capacity(slice_file_urls.len());
        for url in &slice_file_urls {
            let (_, name) = get_file_name(url);
            let local_path = downloader.download_file(url, &name, None).await?;
            slices.push(Slice {
                source: local_path.to_string_lossy().into_owned(),
                name,
            });
        }

        let video_id = self
            .upload_m3u8_slices(request, &playlist_path, &slices)
            .await?;

        self.remove_local_file(&playlist_path).await;
        for slice in &slices {
            self.remove_local_file(Path::new(&slice.source)).await;
        }
        if let Err(e) = fs::remove_dir(&playlist_dir).await {
            tracing::warn!(dir = %playlist_dir.display(), error = %e, "failed to remove m3u8 work dir");
        }
        Ok(video_id)
    }

    /// Lists the segment sources of a local or remote playlist, assuming the
    /// segments sit next to it.
    pub async fn parse_m3u8_file(&self, m3u8_file_path: &str) -> VodResult<Vec<String>> {
        let text = self.read_text(m3u8_file_path).await.map_err(|e| {
            VodError::FileRead(format!("m3u8 file access fail: {}: {}", m3u8_file_path, e))
        })?;
        Playlist::parse(&text).segment_sources(m3u8_file_path)
    }

    pub fn open_session(&self, info: UploadInfo) -> VodResult<UploadSession> {
        let storage = self
            .connector
            .connect(&info.upload_auth, &info.upload_address)?;
        Ok(UploadSession {
            info,
            storage,
            minted_at: Instant::now(),
        })
    }

    /// Re-mints video credentials and rebinds storage to them.
    pub async fn refresh_session(&self, session: UploadSession) -> VodResult<UploadSession> {
        let info = self.refresh_upload_video(&session.info.media_id).await?;
        self.open_session(info)
    }

    /// Uploads one local file to `object_key`, choosing a whole-file PUT or a
    /// multipart upload by size. Returns the session, which may carry
    /// refreshed credentials.
    pub async fn upload_object(
        &self,
        file_path: &Path,
        object_key: &str,
        session: UploadSession,
        headers: Option<&UploadHeaders>,
    ) -> VodResult<UploadSession> {
        let metadata = fs::metadata(file_path).await.map_err(|e| {
            VodError::FileRead(format!("file not exists: {}: {}", file_path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(VodError::FileRead(format!(
                "The size of file cannot be determined: {}",
                file_path.display()
            )));
        }
        let file_size = metadata.len();

        let file_hash = match session.info.media_type {
            MediaType::Video => Some(
                generate_file_part_hash(&self.config.access_key_id, file_path, file_size).await,
            ),
            _ => None,
        };

        let session = if self.is_simple_upload(file_size) {
            self.simple_upload(file_path, object_key, session, file_size, file_hash.as_deref())
                .await?
        } else {
            self.multipart_upload(
                file_path,
                object_key,
                session,
                headers,
                file_size,
                file_hash.as_deref(),
            )
            .await?
        };

        tracing::info!(
            media_type = %session.info.media_type,
            media_id = %session.info.media_id,
            file_path = %file_path.display(),
            destination = %format!("{}/{}", session.info.bucket_host(), object_key),
            "UploadFile Finish"
        );
        Ok(session)
    }

    /// Files at or under the threshold, or smaller than one part, go up in a
    /// single PUT.
    pub fn is_simple_upload(&self, file_size: u64) -> bool {
        file_size <= self.config.multipart_threshold || file_size < self.config.multipart_part_size
    }

    async fn simple_upload(
        &self,
        file_path: &Path,
        object_key: &str,
        session: UploadSession,
        file_size: u64,
        file_hash: Option<&str>,
    ) -> VodResult<UploadSession> {
        let bucket = &session.info.upload_address.bucket;
        session
            .storage
            .put_object_from_file(bucket, object_key, file_path)
            .await?;

        (self.progress_callback)(&session.info.media_id, file_size, file_size);
        if let Some(file_hash) = file_hash {
            self.report_progress(
                &session.info,
                file_path,
                file_hash,
                file_size,
                None,
                UploadPoint {
                    up_method: UploadMethod::Put.as_str(),
                    threshold: self.config.multipart_threshold,
                    part_size: self.config.multipart_part_size,
                    done_bytes: file_size,
                },
                (file_size, 1, 1),
            );
        }
        Ok(session)
    }

    async fn multipart_upload(
        &self,
        file_path: &Path,
        object_key: &str,
        mut session: UploadSession,
        headers: Option<&UploadHeaders>,
        file_size: u64,
        file_hash: Option<&str>,
    ) -> VodResult<UploadSession> {
        let part_size = self.config.multipart_part_size;
        let bucket = session.info.upload_address.bucket.clone();
        let media_id = session.info.media_id.clone();
        let total_part = file_size.div_ceil(part_size);

        let upload_id = session
            .storage
            .initiate_multipart_upload(&bucket, object_key)
            .await?;
        tracing::debug!(media_id = %media_id, upload_id = %upload_id, total_part, "multipart upload initiated");

        let read_error = |e: std::io::Error| {
            VodError::FileRead(format!("{}: {}", file_path.display(), e))
        };
        let mut file = File::open(file_path).await.map_err(read_error)?;
        let mut completed_parts = Vec::with_capacity(total_part as usize);

        for index in 0..total_part {
            let offset = index * part_size;
            let length = part_size.min(file_size - offset);
            let part_number = (index + 1) as i32;

            let mut buffer = vec![0u8; length as usize];
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(read_error)?;
            file.read_exact(&mut buffer).await.map_err(read_error)?;
            let content_md5 = self
                .config
                .check_md5
                .then(|| crate::utils::hash::md5_base64(&buffer));

            let etag = session
                .storage
                .upload_part(
                    &bucket,
                    object_key,
                    &upload_id,
                    part_number,
                    Bytes::from(buffer),
                    content_md5,
                )
                .await?;
            tracing::debug!(media_id = %media_id, part_number, length, "UploadPart");
            completed_parts.push(CompletedPartInfo { part_number, etag });

            let done_bytes = offset + length;
            (self.progress_callback)(&media_id, done_bytes, file_size);

            if let Some(file_hash) = file_hash {
                self.report_progress(
                    &session.info,
                    file_path,
                    file_hash,
                    file_size,
                    Some(&upload_id),
                    UploadPoint {
                        up_method: UploadMethod::Multipart.as_str(),
                        threshold: self.config.multipart_threshold,
                        part_size,
                        done_bytes,
                    },
                    (part_size, total_part, part_number as u64),
                );

                if session.credentials_age() >= self.config.credential_refresh_interval {
                    session = self.refresh_session(session).await?;
                    tracing::info!(media_id = %media_id, part_number, "upload credentials refreshed");
                }
            }
        }

        session
            .storage
            .complete_multipart_upload(&bucket, object_key, &upload_id, &completed_parts, headers)
            .await?;

        if let Some(file_hash) = file_hash {
            self.report_progress(
                &session.info,
                file_path,
                file_hash,
                file_size,
                Some(&upload_id),
                UploadPoint {
                    up_method: UploadMethod::Multipart.as_str(),
                    threshold: self.config.multipart_threshold,
                    part_size,
                    done_bytes: file_size,
                },
                (part_size, total_part, total_part),
            );
        }
        Ok(session)
    }

    /// `parts` is `(part_size, total_part, done_parts_count)`.
    #[allow(clippy::too_many_arguments)]
    fn report_progress(
        &self,
        info: &UploadInfo,
        file_path: &Path,
        file_hash: &str,
        file_size: u64,
        upload_id: Option<&str>,
        upload_point: UploadPoint,
        parts: (u64, u64, u64),
    ) {
        let (part_size, total_part, done_parts_count) = parts;
        let record = ProgressRecord {
            file_name: file_path.display().to_string(),
            file_hash: file_hash.to_string(),
            file_size,
            upload_id: upload_id.map(String::from),
            part_size,
            total_part,
            done_parts_count,
            upload_point,
            upload_address: info.ori_upload_address.clone(),
        };
        self.reporter.report(&info.media_id, record);
    }

    async fn create_upload_video(&self, request: &UploadVideoRequest) -> VodResult<UploadInfo> {
        let raw = self.vod_api.create_upload_video(request).await?;
        let info = UploadInfo::decode(raw, MediaType::Video)?;
        tracing::info!(file_path = %request.file_path(), video_id = %info.media_id, "CreateUploadVideo");
        Ok(info)
    }

    async fn refresh_upload_video(&self, video_id: &str) -> VodResult<UploadInfo> {
        let mut raw = self.vod_api.refresh_upload_video(video_id).await?;
        if raw.video_id.is_none() {
            raw.video_id = Some(video_id.to_string());
        }
        let info = UploadInfo::decode(raw, MediaType::Video)?;
        tracing::info!(video_id = %info.media_id, "RefreshUploadVideo");
        Ok(info)
    }

    async fn create_upload_image(&self, request: &UploadImageRequest) -> VodResult<UploadInfo> {
        let raw = self.vod_api.create_upload_image(request).await?;
        let info = UploadInfo::decode(raw, MediaType::Image)?;
        tracing::info!(
            file_path = %request.file_path(),
            image_id = %info.media_id,
            image_url = ?info.media_url,
            "CreateUploadImage"
        );
        Ok(info)
    }

    async fn create_upload_attached_media(
        &self,
        request: &UploadAttachedMediaRequest,
    ) -> VodResult<UploadInfo> {
        let raw = self.vod_api.create_upload_attached_media(request).await?;
        let info = UploadInfo::decode(raw, MediaType::Attached)?;
        tracing::info!(
            file_path = %request.file_path(),
            media_id = %info.media_id,
            media_url = ?info.media_url,
            "CreateUploadAttachedMedia"
        );
        Ok(info)
    }

    async fn upload_m3u8_slices(
        &self,
        request: &UploadVideoRequest,
        playlist_path: &Path,
        slices: &[Slice],
    ) -> VodResult<String> {
        let mut staged = request.clone();
        staged.set_file_path(&playlist_path.to_string_lossy(), None)?;

        let info = self.create_upload_video(&staged).await?;
        let headers = upload_headers(&staged);
        let mut session = self.open_session(info)?;

        for slice in slices {
            let object_key = format!("{}{}", session.info.object_prefix(), slice.name);
            session = self
                .upload_object(
                    Path::new(&slice.source),
                    &object_key,
                    session,
                    headers.as_ref(),
                )
                .await?;
        }

        let object_key = session.info.upload_address.file_name.clone();
        let session = self
            .upload_object(playlist_path, &object_key, session, headers.as_ref())
            .await?;
        Ok(session.info.media_id)
    }

    /// `<save_dir>/<md5(file name)>/` and the rewritten playlist inside it.
    fn m3u8_local_path(&self, request: &UploadVideoRequest) -> (PathBuf, PathBuf) {
        let dir = self.config.save_dir.join(md5_hex(request.file_name()));
        let path = dir.join(base_name(request.file_name()));
        (dir, path)
    }

    async fn rewrite_m3u8_file(&self, src_path: &str, dst_path: &Path) -> VodResult<()> {
        let text = self.read_text(src_path).await.map_err(|e| {
            VodError::M3u8Rewrite(format!("m3u8 file access fail: {}: {}", src_path, e))
        })?;

        if let Some(dir) = dst_path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| {
                VodError::M3u8Rewrite(format!(
                    "m3u8 file mkdir fail: {}: {}",
                    dst_path.display(),
                    e
                ))
            })?;
        }

        fs::write(dst_path, Playlist::parse(&text).rewrite())
            .await
            .map_err(|e| {
                VodError::M3u8Rewrite(format!(
                    "m3u8 file rewrite fail: {}: {}",
                    dst_path.display(),
                    e
                ))
            })
    }

    async fn read_text(&self, path: &str) -> Result<String, String> {
        if is_web_url(path) {
            let response = self
                .http_client
                .get(path)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| e.to_string())?;
            response.text().await.map_err(|e| e.to_string())
        } else {
            fs::read_to_string(path).await.map_err(|e| e.to_string())
        }
    }

    /// Downloads the request's source into the save directory and returns a
    /// copy of the request pointing at it.
    async fn download_web_media<R>(&self, request: &R) -> VodResult<(R, PathBuf)>
    where
        R: MediaRequest + Clone,
    {
        let local_file_name = format!(
            "{}.{}",
            md5_hex(request.file_name()),
            request.media_ext()
        );
        let local_path = self
            .downloader
            .download_file(request.file_path(), &local_file_name, None)
            .await?;

        let mut staged = request.clone();
        staged.set_file_path(&local_path.to_string_lossy(), None)?;
        Ok((staged, local_path))
    }

    async fn remove_local_file(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove local file");
        }
    }
}
