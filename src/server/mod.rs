pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::{configure_app, AppConfig, AppState};
pub use error::ApiError;
