use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("model API request failed: {0}")]
    Api(String),

    #[error("failed to parse model response: {0}")]
    Parse(String),
}
