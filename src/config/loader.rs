use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Result, WrapErr};

use crate::config::{models::ServerConfig, validation::ServerConfigValidator};

/// Load and validate configuration from a file using the config crate.
/// Supports multiple formats: YAML, JSON, TOML, etc.
///
/// An invalid service registry is fatal: the caller must not start serving.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    let config = load_config_sync(config_path)?;
    ServerConfigValidator::validate(&config)
        .wrap_err_with(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

/// Load configuration synchronously, without validation
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .wrap_err_with(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().wrap_err_with(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}

/// Load configuration without validation (used for validation command)
pub async fn load_config_unchecked(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}
