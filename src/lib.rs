pub mod server;

pub use server::{configure_app, AppConfig, AppState};

// Re-export specific items from server
pub use server::services;
