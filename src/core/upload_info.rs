use crate::core::error::{VodError, VodResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
    Attached,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Image => "image",
            MediaType::Attached => "attached",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control-plane response as returned by the `CreateUpload*` and
/// `RefreshUploadVideo` actions. Address and auth are base64 encoded JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawUploadInfo {
    pub request_id: Option<String>,
    pub video_id: Option<String>,
    pub image_id: Option<String>,
    #[serde(rename = "ImageURL")]
    pub image_url: Option<String>,
    pub media_id: Option<String>,
    #[serde(rename = "MediaURL")]
    pub media_url: Option<String>,
    #[serde(rename = "FileURL")]
    pub file_url: Option<String>,
    pub upload_address: String,
    pub upload_auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadAddress {
    pub endpoint: String,
    pub bucket: String,
    /// Object key of the uploaded media file.
    pub file_name: String,
    #[serde(default)]
    pub object_prefix: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadAuth {
    pub access_key_id: String,
    pub access_key_secret: String,
    #[serde(default)]
    pub security_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, rename = "ExpireUTCTime")]
    pub expire_utc_time: Option<String>,
}

impl fmt::Debug for UploadAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadAuth")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("expire_utc_time", &self.expire_utc_time)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub media_type: MediaType,
    pub media_id: String,
    pub media_url: Option<String>,
    pub file_url: Option<String>,
    pub upload_address: UploadAddress,
    pub upload_auth: UploadAuth,
    /// Address blob exactly as the control plane returned it.
    pub ori_upload_address: String,
}

fn decode_blob<T: DeserializeOwned>(name: &str, blob: &str) -> VodResult<T> {
    let bytes = STANDARD
        .decode(blob.trim())
        .map_err(|e| VodError::Decode(format!("{} is not valid base64: {}", name, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VodError::Decode(format!("{} is not valid JSON: {}", name, e)))
}

impl UploadInfo {
    pub fn decode(raw: RawUploadInfo, media_type: MediaType) -> VodResult<Self> {
        let upload_address: UploadAddress = decode_blob("UploadAddress", &raw.upload_address)?;
        let upload_auth: UploadAuth = decode_blob("UploadAuth", &raw.upload_auth)?;

        let (media_id, media_url) = match media_type {
            MediaType::Video => (raw.video_id, None),
            MediaType::Image => (raw.image_id, raw.image_url),
            MediaType::Attached => (raw.media_id, raw.media_url),
        };
        let media_id = media_id.ok_or_else(|| {
            VodError::Decode(format!("{} upload info carries no media id", media_type))
        })?;

        Ok(Self {
            media_type,
            media_id,
            media_url,
            file_url: raw.file_url,
            upload_address,
            upload_auth,
            ori_upload_address: raw.upload_address,
        })
    }

    pub fn object_prefix(&self) -> &str {
        self.upload_address.object_prefix.as_deref().unwrap_or("")
    }

    /// Endpoint with the bucket prepended to the host, for logging.
    pub fn bucket_host(&self) -> String {
        self.upload_address.endpoint.replacen(
            "://",
            &format!("://{}.", self.upload_address.bucket),
            1,
        )
    }
}
