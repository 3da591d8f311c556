mod fs_registry;
mod http_registry;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use paxd_core::{is_valid_package_id, PackageManifest, PackageSource, LEGACY_MANIFEST_FILE_NAME};

pub use fs_registry::FsRegistry;
pub use http_registry::HttpRegistry;

/// Manifest file names tried in order under `packages/<id>/`. The last one is
/// the legacy JSONC format.
pub const MANIFEST_FILE_NAMES: [&str; 3] =
    ["package.yaml", "paxd.yaml", LEGACY_MANIFEST_FILE_NAME];

/// A registry location from configuration: a URL or a local directory.
#[derive(Debug)]
pub enum Registry {
    Fs(FsRegistry),
    Http(HttpRegistry),
}

impl Registry {
    /// Opens `location`, ignoring the legacy `optimised::` marker some
    /// repository files carry.
    pub fn open(location: &str) -> Result<Self> {
        let location = location.trim();
        let location = location.strip_prefix("optimised::").unwrap_or(location);
        if location.starts_with("http://") || location.starts_with("https://") {
            Ok(Self::Http(HttpRegistry::new(location)?))
        } else {
            Ok(Self::Fs(FsRegistry::open(PathBuf::from(location))))
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::Fs(registry) => registry.root().display().to_string(),
            Self::Http(registry) => registry.base_url().to_string(),
        }
    }
}

impl PackageSource for Registry {
    fn load_manifest(&self, package_id: &str) -> Result<Option<PackageManifest>> {
        match self {
            Self::Fs(registry) => registry.load_manifest(package_id),
            Self::Http(registry) => registry.load_manifest(package_id),
        }
    }

    fn fetch_file(&self, package_id: &str, rel_path: &str, destination: &Path) -> Result<()> {
        match self {
            Self::Fs(registry) => registry.fetch_file(package_id, rel_path, destination),
            Self::Http(registry) => registry.fetch_file(package_id, rel_path, destination),
        }
    }
}

fn check_package_id(package_id: &str) -> Result<()> {
    if !is_valid_package_id(package_id) {
        return Err(anyhow!("invalid package id '{package_id}'"));
    }
    Ok(())
}

/// Manifest parse failures keep their [`paxd_core::ManifestError`] so callers
/// can tell a broken manifest from a transport error.
fn parse_manifest(file_name: &str, raw: &str) -> Result<PackageManifest> {
    let parsed = if file_name == LEGACY_MANIFEST_FILE_NAME {
        PackageManifest::from_legacy_jsonc_str(raw)
    } else {
        PackageManifest::from_yaml_str(raw)
    };
    parsed.map_err(anyhow::Error::from)
}

#[cfg(test)]
mod tests;
