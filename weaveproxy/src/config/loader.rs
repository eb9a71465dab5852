//! Configuration file loading

use super::schema::ProxyConfig;
use crate::error::{ProxyError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        // Priority order:
        // 1. $WEAVEPROXY_CONFIG
        // 2. $XDG_CONFIG_HOME/weaveproxy/config.toml
        // 3. ~/.config/weaveproxy/config.toml

        if let Ok(path) = env::var("WEAVEPROXY_CONFIG") {
            return PathBuf::from(path);
        }

        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("weaveproxy/config.toml");
        }

        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".config/weaveproxy/config.toml");
        }

        PathBuf::from("config.toml")
    }

    /// Load config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ProxyError::FileLoad {
            what: "config",
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: ProxyConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load config from the default location, falling back to defaults
    pub fn load() -> Result<ProxyConfig> {
        let path = Self::default_config_path();

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Ok(ProxyConfig::default())
        }
    }

    /// Load config from an explicit path, or the default location
    /// Priority: Explicit path > User config > Defaults
    pub fn load_or_default(path: Option<PathBuf>) -> Result<ProxyConfig> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Self::load(),
        }
    }
}
