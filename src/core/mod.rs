pub mod config;
pub mod error;
pub mod request;
pub mod s3_client;
pub mod upload_info;
pub mod vod_client;
