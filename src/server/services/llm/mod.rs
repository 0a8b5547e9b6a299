mod error;
mod service;
mod types;

pub use error::LlmError;
pub use service::LlmService;
pub use types::*;
