use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Handler(String),

    #[error("Tool server error: {0}")]
    Server(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn handler(msg: impl Into<String>) -> Self {
        ToolError::Handler(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
