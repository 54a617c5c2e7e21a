use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepairError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file not tracked: {0}")]
    NotTracked(String),
    #[error("repair source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("encode error: {0}")]
    EncodeError(String),
    #[error("encryption error: {0}")]
    EncryptionError(String),
    #[error("upload error: {0}")]
    UploadError(String),
    #[error("Config file read error: {0}")]
    ReadConfigError(String),
    #[error("Config parser error: {0}")]
    ParserConfigError(String),
    #[error("init logger failed: {0}")]
    LogInitError(String),
}

pub type RepairResult<T> = std::result::Result<T, RepairError>;
