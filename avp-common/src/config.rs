//! Configuration file discovery and TOML loading
//!
//! Config file resolution priority order:
//! 1. Explicit path (command-line argument)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/avp/config.toml`)
//! 4. None (caller falls back to compiled defaults)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "AVP_CONFIG";

/// Resolve which config file (if any) should be loaded.
///
/// An explicit path or environment variable must point to an existing file;
/// the platform default is only used when it exists.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_existing(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_existing(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    if let Some(path) = default_config_path() {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // Priority 4: compiled defaults
    Ok(None)
}

/// Platform config file location (`~/.config/avp/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("avp").join("config.toml"))
}

/// Parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading config file: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(value)
}

fn require_existing(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}
