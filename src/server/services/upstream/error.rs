use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("unknown interface: {0}")]
    UnknownInterface(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("result of {size} bytes exceeds the size limit")]
    ResultTooLarge { size: usize },
}

impl UpstreamError {
    /// Transient failures are worth another attempt; structured rejections
    /// (bad parameters, oversized results) are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout
                | UpstreamError::Transport(_)
                | UpstreamError::Status {
                    status: 500..=599,
                    ..
                }
        )
    }
}
