use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Download error: {0}")]
    Download(String),

    #[error("yt-dlp error: {0}")]
    YtDlp(String),

    #[error("Content index error: {0}")]
    Index(String),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// True when the error is a missing file, so callers can fall back to defaults
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            AppError::NotFound(_) => true,
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
