use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    config.store = config.store.redacted();

    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
