mod error;
mod service;

pub use error::FileStoreError;
pub use service::{FileStore, UploadSink};
