mod error;
mod retry;
mod service;

pub use error::UpstreamError;
pub use retry::RetryPolicy;
pub use service::{scalar_text, UpstreamClient};
