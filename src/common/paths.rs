use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for slidecast

/// Get the slidecast config directory
pub fn slidecast_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("slidecast");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

/// User data directory, falling back to `.local/share` under the real home directory.
fn user_data_dir() -> Option<PathBuf> {
    dirs::data_dir().or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
}

/// Get the slidecast data directory
pub fn slidecast_data_dir() -> Result<PathBuf> {
    let data_dir = user_data_dir()
        .context("Unable to determine user data directory")?
        .join("slidecast");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory at {}", data_dir.display()))?;

    Ok(data_dir)
}

/// Default base directory presentation documents are resolved against.
/// Not created eagerly, a missing base directory surfaces as a missing input.
pub fn default_presentations_dir() -> PathBuf {
    user_data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("slidecast")
        .join("presentations")
}

/// Directory holding run lease lock files
pub fn lease_dir() -> Result<PathBuf> {
    let dir = slidecast_data_dir()?.join("leases");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating lease directory at {}", dir.display()))?;
    Ok(dir)
}
