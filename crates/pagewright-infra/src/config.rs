//! Global configuration loader for Pagewright.
//!
//! Reads `config.toml` from the data directory (`~/.pagewright/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use pagewright_types::config::GlobalConfig;

/// Environment variable holding the Anthropic API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingApiKey(&'static str),
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Resolve the data directory.
///
/// Priority: `PAGEWRIGHT_DATA_DIR`, then `~/.pagewright`, then `./.pagewright`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PAGEWRIGHT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".pagewright");
    }

    PathBuf::from(".pagewright")
}

/// Directory deployed sites are written under: `{data_dir}/sites/`.
pub fn sites_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("sites")
}

/// Read the model API key from the environment.
pub fn load_api_key() -> Result<SecretString, ConfigError> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(SecretString::from(key)),
        _ => Err(ConfigError::MissingApiKey(API_KEY_ENV)),
    }
}
