pub mod analyst;
pub mod cache;
pub mod catalog;
pub mod files;
pub mod llm;
pub mod token;
pub mod tools;
pub mod upstream;
pub mod user_store;
