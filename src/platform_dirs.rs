/// Cross-platform directory management for webhook admission
///
/// Uses the `dirs` crate to handle platform-specific directories
/// following OS conventions:
/// - Linux/Unix: XDG Base Directory Specification
/// - macOS: Apple directory guidelines
/// - Windows: Windows directory standards
use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "webhook-admission";

/// Name of the webhook registration file inside the config directory
pub const CONFIG_FILE: &str = "webhooks.toml";

/// Get the config directory
///
/// Returns platform-specific config directory:
/// - Linux: `$XDG_CONFIG_HOME/webhook-admission` or `~/.config/webhook-admission`
/// - macOS: `~/Library/Application Support/webhook-admission`
/// - Windows: `%APPDATA%\webhook-admission`
pub fn config_dir() -> Result<PathBuf> {
    let base_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("Unable to determine config directory"))?;
    Ok(base_dir.join(APP_DIR))
}

/// Default location of the webhook registration file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}
