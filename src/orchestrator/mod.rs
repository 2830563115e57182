pub mod downloader;
pub mod playlist;
pub mod report;
pub mod uploader;
