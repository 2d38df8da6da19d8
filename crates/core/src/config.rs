//! Daemon configuration files.
//!
//! Command-line flags win over environment variables, which win over the
//! config file, which wins over built-in defaults. This module only finds and
//! parses the file; merging happens in the daemon.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{debug, info};
use serde::de::DeserializeOwned;

use crate::APP_NAME;

/// Where the active configuration comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Given with `--config` or the config env var
    Explicit(PathBuf),
    /// `./<filename>`
    CurrentDir(PathBuf),
    /// `$XDG_CONFIG_HOME/dwd-radiation/` or `~/.config/dwd-radiation/`
    XdgConfig(PathBuf),
    /// `/etc/dwd-radiation/`
    System(PathBuf),
    /// Nothing found
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(path)
            | ConfigSource::CurrentDir(path)
            | ConfigSource::XdgConfig(path)
            | ConfigSource::System(path) => Some(path.as_path()),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Defaults => write!(f, "built-in defaults"),
            source => match source.path() {
                Some(path) => write!(f, "{}", path.display()),
                None => Ok(()),
            },
        }
    }
}

/// First existing config file among: the path in `env_var`, `./filename`,
/// the XDG config directory and `/etc/dwd-radiation/`.
pub fn find_config_file(env_var: &str, filename: &str) -> ConfigSource {
    let mut candidates = Vec::with_capacity(4);
    match env::var(env_var) {
        Ok(path) => candidates.push(ConfigSource::Explicit(PathBuf::from(path))),
        Err(_) => debug!("{} not set", env_var),
    }
    candidates.push(ConfigSource::CurrentDir(PathBuf::from(filename)));
    candidates.push(ConfigSource::XdgConfig(get_xdg_config_path(filename)));
    candidates.push(ConfigSource::System(
        Path::new("/etc").join(APP_NAME).join(filename),
    ));

    candidates
        .into_iter()
        .find(|candidate| candidate.path().is_some_and(Path::exists))
        .unwrap_or(ConfigSource::Defaults)
}

/// `filename` inside the per-user config directory of the application.
pub fn get_xdg_config_path(filename: &str) -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join(APP_NAME).join(filename)
}

/// Parses the TOML file behind `source`; [`ConfigSource::Defaults`] gives
/// `T::default()`.
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    let Some(path) = source.path() else {
        return Ok(T::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    info!("loaded configuration from {}", source);
    Ok(config)
}
