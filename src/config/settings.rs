use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

pub const CONFIG_ENV: &str = "PROMPTHUB_CONFIG";

/// Upper bound for `auth.session_ttl_hours`.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub uploads: UploadsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/prompthub.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Upper bound for a single gateway call; the run fails with a timeout past it.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
    pub cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24,
            cookie_secure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub dir: String,
    pub max_bytes: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: "data/uploads".to_string(),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl UploadsConfig {
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

impl Settings {
    pub fn load() -> Result<Self, AppError> {
        let Some(config_path) = Self::find_config_file() else {
            tracing::warn!("No configuration file found, using defaults");
            let settings = Settings::default();
            settings.validate()?;
            return Ok(settings);
        };
        tracing::info!("Loading configuration from {}", config_path.display());
        let config_content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| AppError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.server.port == 0 {
            return Err(AppError::Config("server.port must be non-zero".into()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(AppError::Config("llm.timeout_secs must be positive".into()));
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.auth.session_ttl_hours) {
            return Err(AppError::Config(format!(
                "auth.session_ttl_hours must be between 1 and {MAX_SESSION_TTL_HOURS}"
            )));
        }
        Ok(())
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            if !explicit.trim().is_empty() {
                return Some(PathBuf::from(explicit));
            }
        }

        let possible_names = ["custom-config.toml", "config.toml"];
        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(PathBuf::from)
    }
}
