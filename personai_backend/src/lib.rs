pub mod character_catalog;
pub mod config;
pub mod conversation;
pub mod http_client;
pub mod llm_client;
pub mod prompt;
pub mod runtime;
pub mod sanitizer;
pub mod server;
pub mod store;
pub mod turn;
