//! Storage collaborator. Object storage speaks the S3 multipart protocol; the
//! wire mechanics are left to aws-sdk-s3.

use crate::core::config::UploaderConfig;
use crate::core::error::{VodError, VodResult};
use crate::core::upload_info::{UploadAddress, UploadAuth};
use crate::utils::path::convert_oss_internal;
use async_trait::async_trait;
use aws_config::Region;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{RequestChecksumCalculation, ResponseChecksumValidation};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{Client, Config, config::Credentials};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type UploadHeaders = BTreeMap<String, String>;

const FALLBACK_REGION: &str = "cn-shanghai";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartInfo {
    pub part_number: i32,
    pub etag: String,
}

/// Storage operations used by the uploader, bound to one set of credentials.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object_from_file(&self, bucket: &str, key: &str, path: &Path) -> VodResult<()>;

    /// Returns the upload id of the new multipart session.
    async fn initiate_multipart_upload(&self, bucket: &str, key: &str) -> VodResult<String>;

    /// Returns the ETag of the stored part.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: Option<String>,
    ) -> VodResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
        headers: Option<&UploadHeaders>,
    ) -> VodResult<()>;
}

/// Builds a storage client for freshly minted credentials.
pub trait StorageConnector: Send + Sync {
    fn connect(
        &self,
        auth: &UploadAuth,
        address: &UploadAddress,
    ) -> VodResult<Arc<dyn StorageClient>>;
}

/// `oss-cn-shanghai.aliyuncs.com` -> `cn-shanghai`
pub fn region_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint.split("://").last()?.split(['/', ':']).next()?;
    let region = host.strip_prefix("oss-")?.strip_suffix(".aliyuncs.com")?;
    let region = region.strip_suffix("-internal").unwrap_or(region);
    if region.is_empty() {
        None
    } else {
        Some(region.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct S3Connector {
    ecs_region_id: Option<String>,
    enable_ssl: bool,
    connect_timeout: Duration,
    operation_timeout: Duration,
    max_retry_times: u32,
}

impl S3Connector {
    pub fn from_config(config: &UploaderConfig) -> Self {
        Self {
            ecs_region_id: config.ecs_region_id.clone(),
            enable_ssl: config.enable_ssl,
            connect_timeout: config.connect_timeout,
            operation_timeout: config.storage_timeout,
            max_retry_times: config.max_retry_times,
        }
    }

    pub fn endpoint_for(&self, address: &UploadAddress) -> String {
        convert_oss_internal(
            &address.endpoint,
            self.ecs_region_id.as_deref(),
            self.enable_ssl,
        )
    }
}

impl StorageConnector for S3Connector {
    fn connect(
        &self,
        auth: &UploadAuth,
        address: &UploadAddress,
    ) -> VodResult<Arc<dyn StorageClient>> {
        let endpoint = self.endpoint_for(address);
        let region = auth
            .region
            .clone()
            .or_else(|| region_from_endpoint(&address.endpoint))
            .unwrap_or_else(|| FALLBACK_REGION.to_string());
        let client = init_s3_client(&endpoint, &region, auth, self);

        tracing::debug!(endpoint = %endpoint, region = %region, "storage client ready");
        Ok(Arc::new(S3StorageClient { client }))
    }
}

pub fn init_s3_client(
    endpoint_uri: &str,
    region: &str,
    auth: &UploadAuth,
    connector: &S3Connector,
) -> Client {
    let credentials = Credentials::new(
        auth.access_key_id.clone(),
        auth.access_key_secret.clone(),
        auth.security_token.clone(),
        None, // expiration
        "vod-upload-auth",
    );

    let retry_config = RetryConfig::standard().with_max_attempts(connector.max_retry_times.max(1));

    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(connector.connect_timeout)
        .operation_timeout(connector.operation_timeout)
        .build();

    let config = Config::builder()
        .region(Region::new(region.to_string()))
        .endpoint_url(endpoint_uri)
        .force_path_style(false)
        .credentials_provider(credentials)
        .retry_config(retry_config)
        .timeout_config(timeout_config)
        .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
        .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
        .behavior_version_latest()
        .build();

    Client::from_conf(config)
}

pub struct S3StorageClient {
    client: Client,
}

fn storage_error<E>(op: &str, bucket: &str, key: &str, e: E) -> VodError
where
    E: std::error::Error,
{
    let detail = DisplayErrorContext(e).to_string();
    tracing::error!(bucket = %bucket, key = %key, error = %detail, "{} failed", op);
    VodError::Storage(format!("{} {}/{}: {}", op, bucket, key, detail))
}

#[async_trait]
impl StorageClient for S3StorageClient {
    async fn put_object_from_file(&self, bucket: &str, key: &str, path: &Path) -> VodResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| VodError::FileRead(format!("{}: {}", path.display(), e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| storage_error("PutObject", bucket, key, e))?;
        Ok(())
    }

    async fn initiate_multipart_upload(&self, bucket: &str, key: &str) -> VodResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("InitiateMultipartUpload", bucket, key, e))?;

        output
            .upload_id()
            .map(String::from)
            .ok_or_else(|| VodError::Storage(format!("no upload id for {}/{}", bucket, key)))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: Option<String>,
    ) -> VodResult<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .set_content_md5(content_md5)
            .send()
            .await
            .map_err(|e| storage_error("UploadPart", bucket, key, e))?;

        output.e_tag().map(String::from).ok_or_else(|| {
            VodError::Storage(format!(
                "no ETag for part {} of {}/{}",
                part_number, bucket, key
            ))
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
        headers: Option<&UploadHeaders>,
    ) -> VodResult<()> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect::<Vec<_>>();
        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();
        let extra_headers = headers.cloned().unwrap_or_default();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(multipart_upload)
            .customize()
            .mutate_request(move |request| {
                for (name, value) in &extra_headers {
                    request.headers_mut().insert(name.clone(), value.clone());
                }
            })
            .send()
            .await
            .map_err(|e| storage_error("CompleteMultipartUpload", bucket, key, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(endpoint: &str) -> UploadAddress {
        UploadAddress {
            endpoint: endpoint.to_string(),
            bucket: "outin-test".to_string(),
            file_name: "sv/1/1.mp4".to_string(),
            object_prefix: Some("sv/1/".to_string()),
        }
    }

    #[test]
    fn region_is_read_from_endpoint_host() {
        assert_eq!(
            region_from_endpoint("https://oss-cn-shanghai.aliyuncs.com").as_deref(),
            Some("cn-shanghai")
        );
        assert_eq!(
            region_from_endpoint("http://oss-ap-southeast-1-internal.aliyuncs.com/").as_deref(),
            Some("ap-southeast-1")
        );
        assert_eq!(region_from_endpoint("https://s3.amazonaws.com"), None);
    }

    #[test]
    fn connector_rewrites_endpoint() {
        let mut config = UploaderConfig::new("ak", "sk");
        let connector = S3Connector::from_config(&config);
        assert_eq!(
            connector.endpoint_for(&address("https://oss-cn-shanghai.aliyuncs.com")),
            "http://oss-cn-shanghai.aliyuncs.com"
        );

        config.enable_ssl = true;
        config.ecs_region_id = Some("cn-shanghai".to_string());
        let connector = S3Connector::from_config(&config);
        assert_eq!(
            connector.endpoint_for(&address("https://oss-cn-shanghai.aliyuncs.com")),
            "http://oss-cn-shanghai-internal.aliyuncs.com"
        );
    }

    #[tokio::test]
    async fn connect_builds_client_without_network() {
        let connector = S3Connector::from_config(&UploaderConfig::new("ak", "sk"));
        let auth = UploadAuth {
            access_key_id: "STS.1".to_string(),
            access_key_secret: "secret".to_string(),
            security_token: Some("token".to_string()),
            region: None,
            expire_utc_time: None,
        };
        assert!(connector
            .connect(&auth, &address("https://oss-cn-shanghai.aliyuncs.com"))
            .is_ok());
    }
}
