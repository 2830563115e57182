use thiserror::Error;

/// Upload operation errors
#[derive(Debug, Error)]
pub enum VodError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("File read failed: {0}")]
    FileRead(String),

    #[error("File download failed: {0}")]
    FileDownload(String),

    #[error("m3u8 rewrite failed: {0}")]
    M3u8Rewrite(String),

    #[error("Invalid m3u8 slice file: {0}")]
    InvalidM3u8(String),

    #[error("VoD API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("Upload info decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VodError {
    /// Stable error code, numeric for the local file/download/playlist kinds.
    pub fn code(&self) -> String {
        match self {
            VodError::InvalidParameter(_) => "InvalidParameter".to_string(),
            VodError::FileRead(_) => "10000".to_string(),
            VodError::FileDownload(_) => "10001".to_string(),
            VodError::M3u8Rewrite(_) => "10002".to_string(),
            VodError::InvalidM3u8(_) => "10003".to_string(),
            VodError::Api { code, .. } => code.clone(),
            VodError::Storage(_) => "StorageError".to_string(),
            VodError::Client(_) => "ClientError".to_string(),
            VodError::Decode(_) => "DecodeError".to_string(),
            VodError::Io(_) => "IoError".to_string(),
        }
    }
}

/// Result type for upload operations
pub type VodResult<T> = Result<T, VodError>;
