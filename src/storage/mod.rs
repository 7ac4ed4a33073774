//! Storage Layer
//!
//! Platform directories for the configuration file.

use anyhow::Result;
use std::path::PathBuf;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "metervision", "MeterVision")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default configuration file path, `<config_dir>/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}
