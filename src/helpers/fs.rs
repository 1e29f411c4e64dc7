//! File System Utilities
//!
//! Resolves where configuration and persisted client state live.

use crate::error::{Error, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "netconsole", "console-pipeline").ok_or_else(|| Error::Invalid {
        message: "Could not determine project directories".to_string(),
    })
}

fn ensure_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(dir.to_path_buf())
}

/// Get or create the configuration directory
///
/// Platform-specific locations:
/// - **Linux**: `~/.config/console-pipeline/`
/// - **macOS**: `~/Library/Application Support/org.netconsole.console-pipeline/`
/// - **Windows**: `C:\Users\<User>\AppData\Roaming\netconsole\console-pipeline\config\`
pub fn get_or_create_config_dir() -> Result<PathBuf> {
    ensure_dir(project_dirs()?.config_dir())
}

/// Get or create the directory holding durable client state
///
/// Platform-specific locations:
/// - **Linux**: `~/.local/share/console-pipeline/`
/// - **macOS**: `~/Library/Application Support/org.netconsole.console-pipeline/`
/// - **Windows**: `C:\Users\<User>\AppData\Roaming\netconsole\console-pipeline\data\`
pub fn get_or_create_data_dir() -> Result<PathBuf> {
    ensure_dir(project_dirs()?.data_dir())
}

/// Default path of the pipeline configuration file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_or_create_config_dir()?.join("pipeline.toml"))
}

/// Check if running in development mode
pub fn is_development() -> bool {
    cfg!(debug_assertions)
}
