//! Upload progress telemetry.
//!
//! Reporting is fire-and-forget: records are posted from a detached task,
//! failures are logged and never reach the upload.

use crate::utils::hash::{generate_pseudorandom_keccak_hash, md5_hex};
use anyhow::Error;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};
use tokio::io::AsyncReadExt;

pub const VOD_REPORT_HOST: &str = "vod.cn-shanghai.aliyuncs.com";
pub const VOD_REPORT_KEY: &str = "wXr&aLIJdfI7so";
pub const VOD_REPORT_API_VERSION: &str = "2017-03-21";
pub const REPORT_FILE_HASH_READ_LEN: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMethod {
    Put,
    Multipart,
}

impl UploadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMethod::Put => "put",
            UploadMethod::Multipart => "multipart",
        }
    }
}

/// Serialized into the `UploadPoint` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPoint {
    pub up_method: &'static str,
    pub threshold: u64,
    pub part_size: u64,
    pub done_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub file_name: String,
    pub file_hash: String,
    pub file_size: u64,
    pub upload_id: Option<String>,
    pub part_size: u64,
    pub total_part: u64,
    pub done_parts_count: u64,
    pub upload_point: UploadPoint,
    /// Address blob as returned by the control plane.
    pub upload_address: String,
}

pub trait ProgressReporter: Send + Sync {
    /// Must return promptly and never fail the caller.
    fn report(&self, video_id: &str, record: ProgressRecord);
}

/// md5 of the first MiB of the file, or of `client_id|path|mtime` when the
/// file cannot be read.
pub async fn generate_file_part_hash(client_id: &str, file_path: &Path, file_size: u64) -> String {
    let read_len = file_size.min(REPORT_FILE_HASH_READ_LEN);
    let prefix = async {
        let file = tokio::fs::File::open(file_path).await?;
        let mut buffer = Vec::with_capacity(read_len as usize);
        file.take(read_len).read_to_end(&mut buffer).await?;
        Ok::<_, std::io::Error>(buffer)
    }
    .await;

    match prefix {
        Ok(buffer) => md5_hex(buffer),
        Err(e) => {
            tracing::debug!(path = %file_path.display(), error = %e, "hashing file metadata instead");
            let mtime = tokio::fs::metadata(file_path)
                .await
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs().to_string())
                .unwrap_or_default();
            md5_hex(format!("{}|{}|{}", client_id, file_path.display(), mtime))
        }
    }
}

/// Posts progress records to the VoD telemetry endpoint.
#[derive(Debug, Clone)]
pub struct TelemetryReporter {
    http_client: Client,
    client_id: String,
    url: String,
}

impl TelemetryReporter {
    pub fn new(client_id: &str, enable_ssl: bool) -> Result<Self, Error> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(1))
            .timeout(Duration::from_secs(2))
            .build()?;
        let scheme = if enable_ssl { "https" } else { "http" };

        Ok(Self {
            http_client,
            client_id: client_id.to_string(),
            url: format!("{}://{}", scheme, VOD_REPORT_HOST),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn form_fields(
        &self,
        video_id: &str,
        record: &ProgressRecord,
        auth_timestamp: i64,
    ) -> Result<Vec<(&'static str, String)>, Error> {
        let auth_info = md5_hex(format!(
            "{}|{}|{}",
            self.client_id, VOD_REPORT_KEY, auth_timestamp
        ));
        let upload_point = serde_json::to_string(&record.upload_point)?;

        Ok(vec![
            ("Action", "ReportUploadProgress".to_string()),
            ("Format", "JSON".to_string()),
            ("Version", VOD_REPORT_API_VERSION.to_string()),
            (
                "Timestamp",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ),
            ("SignatureNonce", generate_pseudorandom_keccak_hash()),
            ("VideoId", video_id.to_string()),
            ("Source", "RustSDK".to_string()),
            ("ClientId", self.client_id.clone()),
            ("BusinessType", "UploadVideo".to_string()),
            ("TerminalType", "PC".to_string()),
            ("DeviceModel", "Server".to_string()),
            ("AppVersion", env!("CARGO_PKG_VERSION").to_string()),
            ("AuthTimestamp", auth_timestamp.to_string()),
            ("AuthInfo", auth_info),
            ("FileName", record.file_name.clone()),
            ("FileHash", record.file_hash.clone()),
            ("FileSize", record.file_size.to_string()),
            ("FileCreateTime", auth_timestamp.to_string()),
            ("UploadRatio", "0".to_string()),
            (
                "UploadId",
                record.upload_id.clone().unwrap_or_else(|| "0".to_string()),
            ),
            ("DonePartsCount", record.done_parts_count.to_string()),
            ("PartSize", record.part_size.to_string()),
            ("UploadPoint", upload_point),
            ("UploadAddress", record.upload_address.clone()),
        ])
    }

    pub async fn send(&self, video_id: &str, record: &ProgressRecord) -> Result<(), Error> {
        let fields = self.form_fields(video_id, record, chrono::Utc::now().timestamp())?;
        self.http_client
            .post(&self.url)
            .form(&fields)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl ProgressReporter for TelemetryReporter {
    fn report(&self, video_id: &str, record: ProgressRecord) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(video_id, "reportUploadProgress skipped: no async runtime");
            return;
        };
        let reporter = self.clone();
        let video_id = video_id.to_string();
        handle.spawn(async move {
            if let Err(e) = reporter.send(&video_id, &record).await {
                tracing::warn!(video_id = %video_id, error = %e, "reportUploadProgress failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::io::Write;

    fn record() -> ProgressRecord {
        ProgressRecord {
            file_name: "/opt/movie.mp4".to_string(),
            file_hash: "hash".to_string(),
            file_size: 25,
            upload_id: Some("up-1".to_string()),
            part_size: 10,
            total_part: 3,
            done_parts_count: 2,
            upload_point: UploadPoint {
                up_method: UploadMethod::Multipart.as_str(),
                threshold: 10,
                part_size: 10,
                done_bytes: 20,
            },
            upload_address: "b64address".to_string(),
        }
    }

    #[test]
    fn form_fields_carry_auth_and_progress() {
        let reporter = TelemetryReporter::new("client", false).unwrap();
        let fields = reporter.form_fields("vid-1", &record(), 1700000000).unwrap();
        let get = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
                .unwrap()
        };

        assert_eq!(get("AuthInfo"), md5_hex("client|wXr&aLIJdfI7so|1700000000"));
        assert_eq!(get("VideoId"), "vid-1");
        assert_eq!(get("UploadId"), "up-1");
        assert_eq!(get("DonePartsCount"), "2");
        assert_eq!(
            get("UploadPoint"),
            r#"{"upMethod":"multipart","threshold":10,"partSize":10,"doneBytes":20}"#
        );
        assert_eq!(get("UploadAddress"), "b64address");
    }

    #[tokio::test]
    async fn file_hash_covers_first_mebibyte_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![7u8; REPORT_FILE_HASH_READ_LEN as usize];
        file.write_all(&data).unwrap();
        file.write_all(b"tail that is not hashed").unwrap();
        file.flush().unwrap();

        let size = file.as_file().metadata().unwrap().len();
        let hash = generate_file_part_hash("client", file.path(), size).await;
        assert_eq!(hash, md5_hex(&data));

        data.truncate(100);
        let small = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(small.path(), &data).unwrap();
        assert_eq!(
            generate_file_part_hash("client", small.path(), 100).await,
            md5_hex(&data)
        );
    }

    #[tokio::test]
    async fn unreadable_file_falls_back_to_metadata_hash() {
        let path = Path::new("/nonexistent/vod/movie.mp4");
        let hash = generate_file_part_hash("client", path, 10).await;
        assert_eq!(hash, md5_hex("client|/nonexistent/vod/movie.mp4|"));
    }

    #[tokio::test]
    async fn send_posts_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Action".into(), "ReportUploadProgress".into()),
                Matcher::UrlEncoded("ClientId".into(), "client".into()),
                Matcher::UrlEncoded("FileHash".into(), "hash".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let reporter = TelemetryReporter::new("client", false)
            .unwrap()
            .with_url(server.url());
        reporter.send("vid-1", &record()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn report_swallows_failures() {
        let reporter = TelemetryReporter::new("client", false)
            .unwrap()
            .with_url("http://127.0.0.1:1");
        reporter.report("vid-1", record());
        assert!(reporter.send("vid-1", &record()).await.is_err());
    }
}
