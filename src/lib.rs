pub mod config;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod llm_config;
pub mod prompts;
pub mod runner;
pub mod server;
pub mod sessions;
pub mod stats;
pub mod storage;
pub mod template;
pub mod usage;
pub mod users;
