pub mod database;
mod database_favorites;
mod database_llm_configs;
mod database_prompts;
mod database_sessions;
mod database_taxonomy;
mod database_usage_logs;
mod database_users;
pub mod time;

pub use database::Database;
