pub mod settings;

pub use settings::{AuthConfig, DatabaseConfig, LlmConfig, ServerConfig, Settings, UploadsConfig};
