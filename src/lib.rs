//! Uploads local and remote media to a VoD service: videos, images,
//! attached media and m3u8 playlists with their segments.

pub mod core;
pub mod orchestrator;
pub mod utils;

pub use crate::core::config::UploaderConfig;
pub use crate::core::error::{VodError, VodResult};
pub use crate::core::request::{
    MediaRequest, UploadAttachedMediaRequest, UploadImageRequest, UploadVideoRequest,
};
pub use crate::core::s3_client::{S3Connector, StorageClient, StorageConnector, UploadHeaders};
pub use crate::core::upload_info::{MediaType, UploadInfo};
pub use crate::core::vod_client::{HttpVodApi, RequestSigner, VodApi};
pub use crate::orchestrator::downloader::Downloader;
pub use crate::orchestrator::playlist::Playlist;
pub use crate::orchestrator::report::{ProgressRecord, ProgressReporter, TelemetryReporter};
pub use crate::orchestrator::uploader::{
    AttachedMediaUploadResult, ImageUploadResult, UploadSession, Uploader,
};
