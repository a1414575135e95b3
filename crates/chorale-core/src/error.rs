use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Slide index {index} out of range (content has {len} slides)")]
    OutOfRange { index: usize, len: usize },

    #[error("No active tool")]
    NoActiveTool,

    #[error("Invalid tool update: {0}")]
    InvalidToolUpdate(String),

    #[error("Unknown slide code: {0}")]
    UnknownSlideCode(String),

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
