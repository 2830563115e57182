//! Control-plane collaborator: mints upload addresses and credentials.

use crate::core::config::UploaderConfig;
use crate::core::error::{VodError, VodResult};
use crate::core::request::{
    MediaRequest, UploadAttachedMediaRequest, UploadImageRequest, UploadVideoRequest,
};
use crate::core::upload_info::RawUploadInfo;
use crate::utils::path::{VOD_MAX_DESCRIPTION_LENGTH, VOD_MAX_TITLE_LENGTH, truncate_to_bytes};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const VOD_API_VERSION: &str = "2017-03-21";

pub type RequestParams = BTreeMap<String, String>;

#[async_trait]
pub trait VodApi: Send + Sync {
    async fn create_upload_video(&self, request: &UploadVideoRequest)
    -> VodResult<RawUploadInfo>;

    async fn create_upload_image(&self, request: &UploadImageRequest)
    -> VodResult<RawUploadInfo>;

    async fn create_upload_attached_media(
        &self,
        request: &UploadAttachedMediaRequest,
    ) -> VodResult<RawUploadInfo>;

    /// Re-mints credentials for an existing video without resending metadata.
    async fn refresh_upload_video(&self, video_id: &str) -> VodResult<RawUploadInfo>;
}

/// Computes the request signature. The signature algorithm lives with the
/// caller's SDK; this crate only hands over the canonical parameters.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, method: &str, params: &RequestParams, access_key_secret: &str) -> String;
}

fn put_opt(params: &mut RequestParams, key: &str, value: Option<impl ToString>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.to_string());
    }
}

fn put_title(params: &mut RequestParams, title: &str) {
    params.insert(
        "Title".to_string(),
        truncate_to_bytes(title, VOD_MAX_TITLE_LENGTH).to_string(),
    );
}

fn put_description(params: &mut RequestParams, description: Option<&str>) {
    put_opt(
        params,
        "Description",
        description.map(|d| truncate_to_bytes(d, VOD_MAX_DESCRIPTION_LENGTH)),
    );
}

pub fn create_upload_video_params(request: &UploadVideoRequest) -> RequestParams {
    let mut params = RequestParams::new();
    put_title(&mut params, request.title());
    params.insert("FileName".to_string(), request.file_name().to_string());
    put_description(&mut params, request.description.as_deref());
    put_opt(&mut params, "CateId", request.cate_id);
    put_opt(&mut params, "Tags", request.tags.as_deref());
    put_opt(&mut params, "CoverURL", request.cover_url.as_deref());
    put_opt(
        &mut params,
        "TemplateGroupId",
        request.template_group_id.as_deref(),
    );
    put_opt(
        &mut params,
        "StorageLocation",
        request.storage_location.as_deref(),
    );
    put_opt(&mut params, "UserData", request.user_data.as_deref());
    put_opt(&mut params, "AppId", request.app_id.as_deref());
    put_opt(&mut params, "WorkflowId", request.workflow_id.as_deref());
    params
}

pub fn create_upload_image_params(request: &UploadImageRequest) -> RequestParams {
    let mut params = RequestParams::new();
    params.insert("ImageType".to_string(), request.image_type.clone());
    params.insert("ImageExt".to_string(), request.image_ext().to_string());
    put_title(&mut params, request.title());
    put_description(&mut params, request.description.as_deref());
    put_opt(&mut params, "CateId", request.cate_id);
    put_opt(&mut params, "Tags", request.tags.as_deref());
    put_opt(
        &mut params,
        "StorageLocation",
        request.storage_location.as_deref(),
    );
    put_opt(&mut params, "UserData", request.user_data.as_deref());
    put_opt(&mut params, "AppId", request.app_id.as_deref());
    put_opt(&mut params, "WorkflowId", request.workflow_id.as_deref());
    params
}

pub fn create_upload_attached_media_params(request: &UploadAttachedMediaRequest) -> RequestParams {
    let mut params = RequestParams::new();
    params.insert("BusinessType".to_string(), request.business_type.clone());
    params.insert("MediaExt".to_string(), request.media_ext().to_string());
    put_title(&mut params, request.title());
    put_description(&mut params, request.description.as_deref());
    put_opt(&mut params, "CateId", request.cate_id);
    put_opt(&mut params, "Tags", request.tags.as_deref());
    put_opt(
        &mut params,
        "StorageLocation",
        request.storage_location.as_deref(),
    );
    put_opt(&mut params, "FileSize", request.file_size);
    put_opt(&mut params, "UserData", request.user_data.as_deref());
    put_opt(&mut params, "AppId", request.app_id.as_deref());
    put_opt(&mut params, "WorkflowId", request.workflow_id.as_deref());
    params
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// RPC-style control-plane client over reqwest.
pub struct HttpVodApi {
    http_client: Client,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
    security_token: Option<String>,
    max_retry_times: u32,
    signer: Arc<dyn RequestSigner>,
}

impl HttpVodApi {
    pub fn new(config: &UploaderConfig, signer: Arc<dyn RequestSigner>) -> VodResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.vod_timeout)
            .build()
            .map_err(|e| VodError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!("https://vod.{}.aliyuncs.com/", config.api_region_id),
            access_key_id: config.access_key_id.clone(),
            access_key_secret: config.access_key_secret.clone(),
            security_token: config.security_token.clone(),
            max_retry_times: config.max_retry_times,
            signer,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn signed_params(&self, action: &str, mut params: RequestParams) -> RequestParams {
        params.insert("Action".to_string(), action.to_string());
        params.insert("Format".to_string(), "JSON".to_string());
        params.insert("Version".to_string(), VOD_API_VERSION.to_string());
        params.insert("AccessKeyId".to_string(), self.access_key_id.clone());
        params.insert("SignatureMethod".to_string(), "HMAC-SHA1".to_string());
        params.insert("SignatureVersion".to_string(), "1.0".to_string());
        params.insert(
            "SignatureNonce".to_string(),
            uuid::Uuid::new_v4().to_string(),
        );
        params.insert(
            "Timestamp".to_string(),
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        put_opt(&mut params, "SecurityToken", self.security_token.as_deref());

        let signature = self
            .signer
            .sign("POST", &params, &self.access_key_secret);
        params.insert("Signature".to_string(), signature);
        params
    }

    async fn call(&self, action: &str, params: RequestParams) -> VodResult<RawUploadInfo> {
        let mut attempt = 0;
        let response = loop {
            // nonce and timestamp must be fresh on every attempt
            let params = self.signed_params(action, params.clone());
            match self
                .http_client
                .post(&self.endpoint)
                .form(&params)
                .send()
                .await
            {
                Ok(response) => break response,
                Err(e) if attempt < self.max_retry_times && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    tracing::warn!(action, attempt, error = %e, "VoD request failed, retrying");
                }
                Err(e) => {
                    return Err(VodError::Api {
                        code: "RequestFailed".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| VodError::Api {
            code: "ResponseRead".to_string(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let error: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
            let (code, message) = match error {
                Some(error) => (
                    error.code.unwrap_or_else(|| status.as_u16().to_string()),
                    error.message.unwrap_or_default(),
                ),
                None => (status.as_u16().to_string(), body),
            };
            tracing::error!(action, %code, %message, "VoD request rejected");
            return Err(VodError::Api { code, message });
        }

        serde_json::from_str(&body).map_err(|e| VodError::Decode(format!("{}: {}", action, e)))
    }
}

#[async_trait]
impl VodApi for HttpVodApi {
    async fn create_upload_video(
        &self,
        request: &UploadVideoRequest,
    ) -> VodResult<RawUploadInfo> {
        self.call("CreateUploadVideo", create_upload_video_params(request))
            .await
    }

    async fn create_upload_image(
        &self,
        request: &UploadImageRequest,
    ) -> VodResult<RawUploadInfo> {
        self.call("CreateUploadImage", create_upload_image_params(request))
            .await
    }

    async fn create_upload_attached_media(
        &self,
        request: &UploadAttachedMediaRequest,
    ) -> VodResult<RawUploadInfo> {
        self.call(
            "CreateUploadAttachedMedia",
            create_upload_attached_media_params(request),
        )
        .await
    }

    async fn refresh_upload_video(&self, video_id: &str) -> VodResult<RawUploadInfo> {
        let mut params = RequestParams::new();
        params.insert("VideoId".to_string(), video_id.to_string());
        self.call("RefreshUploadVideo", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::upload_info::fixtures::{address_blob, auth_blob};
    use mockito::Matcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSigner;

    impl RequestSigner for FixedSigner {
        fn sign(&self, method: &str, params: &RequestParams, _secret: &str) -> String {
            format!("{}-{}", method, params.len())
        }
    }

    fn api(endpoint: String) -> HttpVodApi {
        HttpVodApi::new(&UploaderConfig::new("ak", "sk"), Arc::new(FixedSigner))
            .unwrap()
            .with_endpoint(endpoint)
    }

    #[test]
    fn unset_fields_are_omitted() {
        let request = UploadVideoRequest::new("/opt/media/movie.mp4", None);
        let params = create_upload_video_params(&request);
        assert_eq!(params.len(), 2);
        assert_eq!(params["Title"], "movie.mp4");
        assert_eq!(params["FileName"], "movie.mp4");

        let mut request = UploadAttachedMediaRequest::new("/opt/w.png", "watermark", None).unwrap();
        request.file_size = Some(2048);
        request.cate_id = Some(7);
        let params = create_upload_attached_media_params(&request);
        assert_eq!(params["FileSize"], "2048");
        assert_eq!(params["CateId"], "7");
        assert_eq!(params["MediaExt"], "png");
        assert!(!params.contains_key("Description"));
    }

    #[test]
    fn titles_are_truncated_to_byte_budget() {
        let long_title = "视".repeat(130);
        let request = UploadVideoRequest::new("/opt/media/movie.mp4", Some(&long_title));
        let params = create_upload_video_params(&request);
        assert!(params["Title"].len() <= VOD_MAX_TITLE_LENGTH);
        assert!(long_title.starts_with(&params["Title"]));
    }

    #[test]
    fn descriptions_are_truncated_to_byte_budget() {
        let mut request = UploadImageRequest::new("/opt/media/cover.png", None).unwrap();
        request.description = Some("d".repeat(VOD_MAX_DESCRIPTION_LENGTH + 10));
        let params = create_upload_image_params(&request);
        assert_eq!(params["Description"].len(), VOD_MAX_DESCRIPTION_LENGTH);
    }

    #[tokio::test]
    async fn transport_failures_retry_then_fail() {
        struct CountingSigner(AtomicUsize);

        impl RequestSigner for CountingSigner {
            fn sign(&self, _method: &str, _params: &RequestParams, _secret: &str) -> String {
                self.0.fetch_add(1, Ordering::SeqCst);
                "sig".to_string()
            }
        }

        let mut config = UploaderConfig::new("ak", "sk");
        config.max_retry_times = 1;
        let signer = Arc::new(CountingSigner(AtomicUsize::new(0)));
        let api = HttpVodApi::new(&config, signer.clone())
            .unwrap()
            .with_endpoint("http://127.0.0.1:1/");

        let err = api.refresh_upload_video("vid-1").await.unwrap_err();

        assert_eq!(err.code(), "RequestFailed");
        assert_eq!(signer.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn create_upload_video_posts_signed_action() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "RequestId": "req-1",
            "VideoId": "vid-1",
            "UploadAddress": address_blob("sv/1/", "sv/1/1.mp4"),
            "UploadAuth": auth_blob("STS.1"),
        });
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Action".into(), "CreateUploadVideo".into()),
                Matcher::UrlEncoded("Version".into(), VOD_API_VERSION.into()),
                Matcher::UrlEncoded("AccessKeyId".into(), "ak".into()),
                Matcher::UrlEncoded("Title".into(), "My movie".into()),
                Matcher::UrlEncoded("FileName".into(), "movie.mp4".into()),
                Matcher::Regex("Signature=POST-".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let request = UploadVideoRequest::new("/opt/media/movie.mp4", Some("My movie"));
        let raw = api(server.url()).create_upload_video(&request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(raw.video_id.as_deref(), Some("vid-1"));
        assert_eq!(raw.request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn api_errors_carry_code_and_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(403)
            .with_body(r#"{"Code":"InvalidAccessKeyId.NotFound","Message":"Specified access key is not found."}"#)
            .create_async()
            .await;

        let err = api(server.url())
            .refresh_upload_video("vid-1")
            .await
            .unwrap_err();
        match err {
            VodError::Api { code, message } => {
                assert_eq!(code, "InvalidAccessKeyId.NotFound");
                assert!(message.contains("not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
