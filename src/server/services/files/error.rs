use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("filename escapes the user directory")]
    PathViolation,

    #[error("file exceeds the size limit")]
    TooLarge,

    #[error("file {0} not found")]
    NotFound(String),

    #[error("could not parse file: {0}")]
    Parse(String),

    #[error("file store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
