//! Resolves Ferry's configuration directory

use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "FERRY_CONFIG_DIR";

/// Return the configuration directory for Ferry.
///
/// `$FERRY_CONFIG_DIR` wins if set; otherwise this is `ferry` under the
/// platform configuration directory (`$XDG_CONFIG_HOME` on Linux).
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
        .ok_or_else(|| anyhow!("Unable to get configuration directory or home directory"))?;
    Ok(config_dir.join("ferry"))
}
