use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use paxd_core::Backend;
use paxd_installer::default_user_prefix;
use serde::Deserialize;

pub(crate) const PREFIX_ENV: &str = "PAXD_PREFIX";

/// `<prefix>/config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct PaxdConfig {
    pub registry: Option<String>,
    /// Parent directory for temporary (fastxd) install roots.
    pub temp_dir: Option<PathBuf>,
    /// Program override per backend, e.g. `pip = "python3"`.
    #[serde(default)]
    pub backends: BTreeMap<Backend, String>,
    /// Launcher per main-executable extension, e.g. `py = "python3"`.
    #[serde(default)]
    pub interpreters: BTreeMap<String, String>,
}

pub(crate) fn parse_config(content: &str) -> Result<PaxdConfig> {
    toml::from_str(content).context("failed to parse config")
}

pub(crate) fn load_config(path: &Path) -> Result<PaxdConfig> {
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content).with_context(|| format!("invalid {}", path.display())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PaxdConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read config: {}", path.display())),
    }
}

/// `--prefix`, then `$PAXD_PREFIX`, then the per-user default.
pub(crate) fn resolve_prefix(flag: Option<PathBuf>, env_value: Option<OsString>) -> Result<PathBuf> {
    if let Some(prefix) = flag {
        return Ok(prefix);
    }
    match env_value {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => default_user_prefix(),
    }
}
