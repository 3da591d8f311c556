use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use paxd_core::{PackageManifest, PackageSource};
use tracing::debug;

use crate::{check_package_id, parse_manifest, MANIFEST_FILE_NAMES};

/// Registry laid out on disk as `<root>/packages/<id>/{package.yaml,files...}`.
#[derive(Debug, Clone)]
pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_dir(&self, package_id: &str) -> PathBuf {
        self.root.join("packages").join(package_id)
    }

    /// Ids of every package directory that carries a manifest, sorted.
    pub fn package_ids(&self) -> Result<Vec<String>> {
        let packages_root = self.root.join("packages");
        if !packages_root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&packages_root).with_context(|| {
            format!(
                "failed to read registry packages: {}",
                packages_root.display()
            )
        })? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if MANIFEST_FILE_NAMES
                .iter()
                .any(|name| entry.path().join(name).is_file())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl PackageSource for FsRegistry {
    fn load_manifest(&self, package_id: &str) -> Result<Option<PackageManifest>> {
        check_package_id(package_id)?;
        let dir = self.package_dir(package_id);
        for name in MANIFEST_FILE_NAMES {
            let path = dir.join(name);
            if path.is_dir() {
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to read manifest: {}", path.display()))
                }
            };
            debug!(package = package_id, path = %path.display(), "loaded manifest");
            return parse_manifest(name, &raw).map(Some);
        }
        Ok(None)
    }

    fn fetch_file(&self, package_id: &str, rel_path: &str, destination: &Path) -> Result<()> {
        check_package_id(package_id)?;
        let source = self.package_dir(package_id).join(rel_path);
        fs::copy(&source, destination).with_context(|| {
            format!(
                "failed to copy {} -> {}",
                source.display(),
                destination.display()
            )
        })?;
        Ok(())
    }
}
