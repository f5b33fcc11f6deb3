use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoryboardError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Frame {0} not found")]
    FrameNotFound(i64),

    #[error("Frame {0} is already generating")]
    FrameBusy(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoryboardError {
    /// 区分超时和其他失败，超时会以单独的提示展示给用户
    pub fn is_timeout(&self) -> bool {
        match self {
            StoryboardError::Timeout(_) => true,
            StoryboardError::Http(err) => err.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoryboardError>;
