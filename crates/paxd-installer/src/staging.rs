use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use paxd_core::{PackageManifest, PackageSource};
use paxd_security::verify_sha256_file;
use tracing::{debug, warn};

use crate::error::InstallError;
use crate::fs_utils::{remove_dir_if_empty, remove_file_if_exists};
use crate::process::CancelToken;
use crate::types::InstalledPackageRecord;

/// Every change one attempt made under an install root, so it can be undone.
/// Overwritten and removed files are moved into `work_dir` rather than
/// deleted until the attempt commits.
#[derive(Debug)]
pub(crate) struct StagingJournal {
    work_dir: PathBuf,
    created_files: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
    backups: Vec<(PathBuf, PathBuf)>,
}

impl StagingJournal {
    pub(crate) fn new(work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            created_files: Vec::new(),
            created_dirs: Vec::new(),
            backups: Vec::new(),
        }
    }

    pub(crate) fn incoming_path(&self, rel_path: &str) -> PathBuf {
        self.work_dir.join("incoming").join(rel_path)
    }

    pub(crate) fn ensure_dir(&mut self, dir: &Path) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path.as_os_str().is_empty() || path.exists() {
                break;
            }
            missing.push(path.to_path_buf());
            current = path.parent();
        }

        for path in missing.into_iter().rev() {
            fs::create_dir(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            self.created_dirs.push(path);
        }
        Ok(())
    }

    /// Moves `incoming` to `destination`, backing up whatever was there.
    pub(crate) fn place(&mut self, incoming: &Path, destination: &Path) -> Result<()> {
        if destination.is_dir() {
            return Err(anyhow!(
                "destination is a directory: {}",
                destination.display()
            ));
        }
        if let Some(parent) = destination.parent() {
            self.ensure_dir(parent)?;
        }

        if destination.exists() {
            self.backup(destination)?;
        } else {
            self.created_files.push(destination.to_path_buf());
        }

        fs::rename(incoming, destination).with_context(|| {
            format!(
                "failed to move staged file {} -> {}",
                incoming.display(),
                destination.display()
            )
        })
    }

    /// Creates an empty file at `path`. A file that did not exist before is
    /// removed again on rollback.
    pub(crate) fn create_empty(&mut self, path: &Path) -> io::Result<()> {
        let existed = path.exists();
        File::create(path)?;
        if !existed {
            self.created_files.push(path.to_path_buf());
        }
        Ok(())
    }

    /// Removes `path`, keeping a backup until commit.
    pub(crate) fn remove(&mut self, path: &Path) -> Result<()> {
        if path.is_file() {
            self.backup(path)?;
        }
        Ok(())
    }

    fn backup(&mut self, path: &Path) -> Result<()> {
        let backup_dir = self.work_dir.join("backup");
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("failed to create {}", backup_dir.display()))?;
        let backup = backup_dir.join(self.backups.len().to_string());
        fs::rename(path, &backup).with_context(|| {
            format!(
                "failed to back up {} -> {}",
                path.display(),
                backup.display()
            )
        })?;
        self.backups.push((path.to_path_buf(), backup));
        Ok(())
    }

    pub(crate) fn commit(self) {
        if let Err(err) = fs::remove_dir_all(&self.work_dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.work_dir.display(), "failed to clean staging area: {err}");
            }
        }
    }

    /// Undoes every recorded change in reverse order. Best effort: a failed
    /// step is logged and the rest still run.
    pub(crate) fn rollback(self) {
        for path in self.created_files.iter().rev() {
            if let Err(err) = remove_file_if_exists(path) {
                warn!(path = %path.display(), "rollback failed to remove file: {err}");
            }
        }
        for (original, backup) in self.backups.iter().rev() {
            if let Err(err) = fs::rename(backup, original) {
                warn!(path = %original.display(), "rollback failed to restore file: {err}");
            }
        }
        for dir in self.created_dirs.iter().rev() {
            if let Err(err) = remove_dir_if_empty(dir) {
                warn!(path = %dir.display(), "rollback failed to remove directory: {err}");
            }
        }
        debug!(
            files = self.created_files.len(),
            restored = self.backups.len(),
            "rolled back staged files"
        );
        let _ = fs::remove_dir_all(&self.work_dir);
    }
}

pub(crate) struct StageRequest<'a> {
    pub package_id: &'a str,
    pub manifest: &'a PackageManifest,
    pub install_root: &'a Path,
    /// Present when this is an update of an installed package.
    pub previous: Option<&'a InstalledPackageRecord>,
    pub skip_checksum: bool,
}

/// Copies the package's files into its install root in declaration order.
/// On update, excluded files that already exist are kept and files the new
/// version no longer lists are removed.
pub(crate) fn stage_package(
    source: &dyn PackageSource,
    request: &StageRequest<'_>,
    journal: &mut StagingJournal,
    cancel: &CancelToken,
) -> Result<(), InstallError> {
    let package_id = request.package_id;
    let manifest = request.manifest;
    let root_display = request.install_root.display().to_string();
    journal
        .ensure_dir(request.install_root)
        .map_err(|err| InstallError::staging(package_id, &root_display, err))?;

    for rel_path in &manifest.install.files {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        let destination = request.install_root.join(rel_path);
        if request.previous.is_some()
            && manifest.is_excluded_from_updates(rel_path)
            && destination.exists()
        {
            debug!(package = package_id, file = %rel_path, "keeping file excluded from updates");
            continue;
        }

        let incoming = journal.incoming_path(rel_path);
        fetch_into(source, package_id, rel_path, &incoming)
            .map_err(|err| InstallError::staging(package_id, rel_path, err))?;

        if !request.skip_checksum {
            if let Some(expected) = manifest.checksum_for(rel_path) {
                let matches = verify_sha256_file(&incoming, expected)
                    .map_err(|err| InstallError::staging(package_id, rel_path, err))?;
                if !matches {
                    return Err(InstallError::staging(
                        package_id,
                        rel_path,
                        anyhow!("sha256 mismatch (expected {expected})"),
                    ));
                }
            }
        }

        journal
            .place(&incoming, &destination)
            .map_err(|err| InstallError::staging(package_id, rel_path, err))?;
    }

    if let Some(previous) = request.previous {
        for stale in previous
            .files
            .iter()
            .filter(|file| !manifest.install.files.contains(file))
        {
            let path = request.install_root.join(stale);
            journal
                .remove(&path)
                .map_err(|err| InstallError::staging(package_id, stale, err))?;
            debug!(package = package_id, file = %stale, "removed file dropped by new version");
        }
    }

    debug!(
        package = package_id,
        files = manifest.install.files.len(),
        root = %request.install_root.display(),
        "staged package files"
    );
    Ok(())
}

fn fetch_into(
    source: &dyn PackageSource,
    package_id: &str,
    rel_path: &str,
    incoming: &Path,
) -> Result<()> {
    if let Some(parent) = incoming.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    source
        .fetch_file(package_id, rel_path, incoming)
        .with_context(|| format!("failed to fetch '{rel_path}' for package '{package_id}'"))?;
    if !incoming.is_file() {
        return Err(anyhow!("registry produced no file for '{rel_path}'"));
    }
    Ok(())
}
