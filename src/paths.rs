//! Common paths for geotrail data storage
//!
//! All geotrail data is stored under ~/.config/geotrail/ on all platforms:
//! - config.toml - User configuration
//! - sessions.enc - Encrypted persisted sessions

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the geotrail data directory (~/.config/geotrail/)
pub fn geotrail_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(".config").join("geotrail");
    fs::create_dir_all(&dir).context("Failed to create geotrail directory")?;
    Ok(dir)
}

/// Get the config file path (~/.config/geotrail/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(geotrail_dir()?.join("config.toml"))
}

/// Get the session file path (~/.config/geotrail/sessions.enc)
pub fn sessions_path() -> Result<PathBuf> {
    Ok(geotrail_dir()?.join("sessions.enc"))
}
