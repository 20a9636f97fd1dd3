pub mod check;
pub mod config;
pub mod serve;

use anyhow::{Context, Result};
use docgate::config::Config;
use std::path::PathBuf;

/// Load configuration from an explicit file or the default locations
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let description = path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "default locations".to_string());

    Config::load_optional(path.as_deref())
        .with_context(|| format!("Failed to load configuration from {}", description))
}
