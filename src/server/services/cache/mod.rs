mod key;
mod service;

pub use key::{cache_key, key_hash};
pub use service::{CacheError, DataCache};
