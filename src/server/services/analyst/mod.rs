mod fallback;
mod service;

pub use fallback::{AnalysisError, FallbackAnalyst};
pub use service::AnalystService;
