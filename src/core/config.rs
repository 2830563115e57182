use crate::core::error::{VodError, VodResult};
use crate::utils::get_env::{env_var_to_bool, get_env_var, get_optional_env_var, parse_env_var};
use anyhow::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_REGION: &str = "cn-shanghai";
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MULTIPART_PART_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_RETRY_TIMES: u32 = 3;
pub const DEFAULT_SAVE_DIR: &str = "tmp_dlfiles";
pub const ENV_PREFIX: &str = "VOD_";

/// Upload credentials stay valid for 3000 seconds; video uploads re-mint them
/// after 2500.
pub const CREDENTIAL_VALIDITY: Duration = Duration::from_secs(3000);
pub const CREDENTIAL_REFRESH_INTERVAL: Duration = Duration::from_secs(2500);

#[derive(Clone)]
pub struct UploaderConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: Option<String>,
    /// Control-plane region.
    pub api_region_id: String,
    /// Region the uploader runs in; enables internal storage endpoints.
    pub ecs_region_id: Option<String>,
    pub enable_ssl: bool,
    pub multipart_threshold: u64,
    pub multipart_part_size: u64,
    pub check_md5: bool,
    pub max_retry_times: u32,
    pub credential_refresh_interval: Duration,
    pub connect_timeout: Duration,
    pub vod_timeout: Duration,
    pub storage_timeout: Duration,
    pub save_dir: PathBuf,
}

impl UploaderConfig {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            security_token: None,
            api_region_id: DEFAULT_API_REGION.to_string(),
            ecs_region_id: None,
            enable_ssl: false,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            multipart_part_size: DEFAULT_MULTIPART_PART_SIZE,
            check_md5: false,
            max_retry_times: DEFAULT_MAX_RETRY_TIMES,
            credential_refresh_interval: CREDENTIAL_REFRESH_INTERVAL,
            connect_timeout: Duration::from_secs(1),
            vod_timeout: Duration::from_secs(3),
            storage_timeout: Duration::from_secs(86400 * 7),
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
        }
    }

    /// Reads the configuration from `VOD_*` variables in the environment (and `.env`).
    pub fn from_env() -> Result<Self, Error> {
        Self::from_env_prefixed(ENV_PREFIX)
    }

    /// Same as [`UploaderConfig::from_env`] with every key under `prefix`.
    pub fn from_env_prefixed(prefix: &str) -> Result<Self, Error> {
        let key = |name: &str| format!("{}{}", prefix, name);
        let mut config = Self::new(
            get_env_var(&key("ACCESS_KEY_ID"))?,
            get_env_var(&key("ACCESS_KEY_SECRET"))?,
        );

        config.security_token = get_optional_env_var(&key("SECURITY_TOKEN"));
        if let Some(region) = get_optional_env_var(&key("REGION_ID")) {
            config.api_region_id = region;
        }
        config.ecs_region_id = get_optional_env_var(&key("ECS_REGION_ID"));
        if let Some(enable_ssl) = env_var_to_bool(&key("ENABLE_SSL")) {
            config.enable_ssl = enable_ssl;
        }
        if let Some(threshold) = parse_env_var::<u64>(&key("MULTIPART_THRESHOLD"))? {
            config.multipart_threshold = threshold;
        }
        if let Some(part_size) = parse_env_var::<u64>(&key("MULTIPART_PART_SIZE"))? {
            config.multipart_part_size = part_size;
        }
        if let Some(check_md5) = env_var_to_bool(&key("CHECK_MD5")) {
            config.check_md5 = check_md5;
        }
        if let Some(retries) = parse_env_var::<u32>(&key("MAX_RETRY_TIMES"))? {
            config.max_retry_times = retries;
        }
        if let Some(save_dir) = get_optional_env_var(&key("SAVE_DIR")) {
            config.save_dir = PathBuf::from(save_dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VodResult<()> {
        if self.access_key_id.is_empty() || self.access_key_secret.is_empty() {
            return Err(VodError::InvalidParameter(
                "access key id and secret are required".to_string(),
            ));
        }
        if self.multipart_part_size == 0 {
            return Err(VodError::InvalidParameter(
                "multipart part size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for UploaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploaderConfig")
            .field("access_key_id", &self.access_key_id)
            .field("api_region_id", &self.api_region_id)
            .field("ecs_region_id", &self.ecs_region_id)
            .field("enable_ssl", &self.enable_ssl)
            .field("multipart_threshold", &self.multipart_threshold)
            .field("multipart_part_size", &self.multipart_part_size)
            .field("check_md5", &self.check_md5)
            .field("max_retry_times", &self.max_retry_times)
            .field("save_dir", &self.save_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_upload_limits() {
        let config = UploaderConfig::new("ak", "sk");
        assert_eq!(config.api_region_id, "cn-shanghai");
        assert_eq!(config.multipart_threshold, 10 * 1024 * 1024);
        assert_eq!(config.multipart_part_size, 10 * 1024 * 1024);
        assert!(!config.check_md5);
        assert!(!config.enable_ssl);
        assert_eq!(
            CREDENTIAL_VALIDITY - config.credential_refresh_interval,
            Duration::from_secs(500)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_hides_secret() {
        let config = UploaderConfig::new("ak-id", "very-secret");
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("ak-id"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn rejects_zero_part_size() {
        let mut config = UploaderConfig::new("ak", "sk");
        config.multipart_part_size = 0;
        assert!(matches!(
            config.validate(),
            Err(VodError::InvalidParameter(_))
        ));
    }

    #[test]
    fn from_env_reads_required_keys_and_overrides() {
        let prefix = "VODCFG_ENV_TEST_";
        assert!(UploaderConfig::from_env_prefixed(prefix).is_err());

        unsafe {
            std::env::set_var("VODCFG_ENV_TEST_ACCESS_KEY_ID", "ak");
            std::env::set_var("VODCFG_ENV_TEST_ACCESS_KEY_SECRET", "sk");
            std::env::set_var("VODCFG_ENV_TEST_MULTIPART_PART_SIZE", "2097152");
            std::env::set_var("VODCFG_ENV_TEST_CHECK_MD5", "true");
            std::env::set_var("VODCFG_ENV_TEST_SAVE_DIR", "/var/tmp/vod");
        }
        let config = UploaderConfig::from_env_prefixed(prefix).unwrap();
        assert_eq!(config.access_key_id, "ak");
        assert_eq!(config.multipart_part_size, 2 * 1024 * 1024);
        assert_eq!(config.multipart_threshold, DEFAULT_MULTIPART_THRESHOLD);
        assert!(config.check_md5);
        assert_eq!(config.save_dir, PathBuf::from("/var/tmp/vod"));

        unsafe {
            std::env::set_var("VODCFG_ENV_TEST_MULTIPART_PART_SIZE", "ten");
        }
        assert!(UploaderConfig::from_env_prefixed(prefix).is_err());

        unsafe {
            std::env::set_var("VODCFG_ENV_TEST_MULTIPART_PART_SIZE", "0");
        }
        assert!(UploaderConfig::from_env_prefixed(prefix).is_err());
    }
}
