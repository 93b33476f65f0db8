use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShardpipeError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("sql error [{code}] ({state}): {message}")]
    Sql {
        code: u16,
        state: String,
        message: String,
    },
    #[error("execution error: {0}")]
    Execution(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShardpipeError {
    /// Per-request errors leave the backend connection reusable; everything
    /// else tears it down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ShardpipeError::Sql { .. })
    }
}
