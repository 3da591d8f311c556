use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
#[cfg(unix)]
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use paxd_core::{Backend, PackageVersion};
use tracing::{debug, warn};

use crate::error::InstallError;
use crate::fs_utils::{remove_file_if_exists, write_atomic};
use crate::layout::PrefixLayout;
use crate::types::{
    AliasBinding, InstallMode, InstallReason, InstalledPackageRecord, MarkerState,
    ResolvedDependency, ScanEntry,
};

/// Installed-package records, one receipt file per package under
/// `state/installed`.
#[derive(Debug, Clone)]
pub struct Ledger {
    layout: PrefixLayout,
}

impl Ledger {
    pub fn new(layout: PrefixLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &PrefixLayout {
        &self.layout
    }

    pub fn record(&self, entry: &InstalledPackageRecord) -> Result<PathBuf> {
        let dir = self.layout.installed_state_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = self.layout.record_path(&entry.name);
        write_atomic(&path, serialize_record(entry)?.as_bytes())
            .with_context(|| format!("failed to write install receipt: {}", path.display()))?;
        debug!(package = %entry.name, version = %entry.version, "ledger record written");
        Ok(path)
    }

    pub fn get(&self, name: &str) -> Result<Option<InstalledPackageRecord>> {
        let path = self.layout.record_path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read install receipt: {}", path.display()))
            }
        };
        parse_record(&raw)
            .map(Some)
            .with_context(|| format!("failed to parse install receipt: {}", path.display()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layout.record_path(name).is_file()
    }

    /// Every record, sorted by package name.
    pub fn list(&self) -> Result<Vec<InstalledPackageRecord>> {
        let dir = self.layout.installed_state_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read install state directory: {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("receipt") {
                continue;
            }

            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read install receipt: {}", path.display()))?;
            let record = parse_record(&raw)
                .with_context(|| format!("failed to parse install receipt: {}", path.display()))?;
            records.push(record);
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Returns false when there was no record to remove.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.layout.record_path(name);
        if !path.exists() {
            return Ok(false);
        }
        remove_file_if_exists(&path)
            .with_context(|| format!("failed to remove install receipt: {}", path.display()))?;
        debug!(package = name, "ledger record removed");
        Ok(true)
    }

    /// Packages whose records list `name` as a self-backend dependency.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|record| record.name != name && record.depends_on(name))
            .map(|record| record.name)
            .collect())
    }

    pub fn scan_export(&self) -> Result<Vec<ScanEntry>> {
        Ok(self
            .list()?
            .into_iter()
            .map(|record| ScanEntry {
                version: record.version.to_string(),
                backend_dependencies: record
                    .dependencies
                    .into_iter()
                    .filter(|dependency| !dependency.backend.is_self())
                    .collect(),
                name: record.name,
            })
            .collect())
    }

    /// Claims the per-package lock. Fails with [`InstallError::Busy`] while
    /// another thread or process holds it.
    pub fn lock(&self, name: &str) -> Result<PackageLock, InstallError> {
        PackageLock::acquire(&self.layout, name)
    }

    pub fn held_locks(&self) -> Result<Vec<String>> {
        let dir = self.layout.locks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read lock directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|v| v.to_str()) != Some("lock") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|v| v.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Exclusive per-package lock file, removed on drop.
#[derive(Debug)]
pub struct PackageLock {
    path: PathBuf,
}

impl PackageLock {
    fn acquire(layout: &PrefixLayout, name: &str) -> Result<Self, InstallError> {
        let path = layout.lock_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if !reclaim_stale_lock(&path)? {
                    return Err(InstallError::Busy(name.to_string()));
                }
                match fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                {
                    Ok(file) => file,
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                        return Err(InstallError::Busy(name.to_string()));
                    }
                    Err(err) => return Err(lock_claim_error(err, &path)),
                }
            }
            Err(err) => return Err(lock_claim_error(err, &path)),
        };

        let lock = Self { path };
        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .with_context(|| format!("failed to write package lock: {}", lock.path.display()))?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        let _ = remove_file_if_exists(&self.path);
    }
}

fn lock_claim_error(err: io::Error, path: &Path) -> InstallError {
    anyhow::Error::new(err)
        .context(format!("failed to claim package lock: {}", path.display()))
        .into()
}

/// Removes a lock whose owning process is gone. Returns false while the
/// owner is alive or the lock has no readable pid yet.
fn reclaim_stale_lock(path: &Path) -> Result<bool> {
    let owner = match fs::read_to_string(path) {
        Ok(raw) => raw.trim().parse::<u32>().ok(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read package lock: {}", path.display()))
        }
    };
    let Some(pid) = owner else {
        return Ok(false);
    };
    if pid == std::process::id() || process_alive(pid)? {
        return Ok(false);
    }

    warn!(path = %path.display(), pid, "removing stale package lock");
    remove_file_if_exists(path)
        .with_context(|| format!("failed to remove stale package lock: {}", path.display()))?;
    Ok(true)
}

fn process_alive(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        let status = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to check whether pid {pid} is alive"))?;
        Ok(status.success())
    }

    #[cfg(windows)]
    {
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
            .output()
            .with_context(|| format!("failed to check whether pid {pid} is alive"))?;
        if !output.status.success() {
            return Err(anyhow!(
                "tasklist failed for pid {pid}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains(&format!(",\"{pid}\"")))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Ok(true)
    }
}

fn check_value(key: &str, value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\t') {
        return Err(anyhow!("receipt {key} must not contain tabs or newlines"));
    }
    Ok(())
}

pub(crate) fn serialize_record(record: &InstalledPackageRecord) -> Result<String> {
    let install_root = record.install_root.to_string_lossy();
    check_value("name", &record.name)?;
    check_value("display_name", &record.display_name)?;
    check_value("install_root", &install_root)?;

    let mut payload = String::new();
    payload.push_str(&format!("name={}\n", record.name));
    payload.push_str(&format!("display_name={}\n", record.display_name));
    payload.push_str(&format!("version={}\n", record.version));
    payload.push_str(&format!("install_root={}\n", install_root));
    payload.push_str(&format!("install_mode={}\n", record.mode.as_str()));
    payload.push_str(&format!("install_reason={}\n", record.reason.as_str()));
    for file in &record.files {
        check_value("file", file)?;
        payload.push_str(&format!("file={}\n", file));
    }
    for dependency in &record.dependencies {
        check_value("dependency", &dependency.id)?;
        check_value("dependency", &dependency.installed_as)?;
        payload.push_str(&format!(
            "dependency={}\t{}\t{}\n",
            dependency.backend, dependency.id, dependency.installed_as
        ));
    }
    if let Some(alias) = &record.alias {
        check_value("alias", &alias.alias)?;
        check_value("alias", &alias.target)?;
        payload.push_str(&format!("alias={}\t{}\n", alias.alias, alias.target));
    }
    payload.push_str(&format!("marker_state={}\n", record.marker_state.as_str()));
    payload.push_str(&format!("installed_at_unix={}\n", record.installed_at_unix));
    payload.push_str(&format!("updated_at_unix={}\n", record.updated_at_unix));
    Ok(payload)
}

pub(crate) fn parse_record(raw: &str) -> Result<InstalledPackageRecord> {
    let mut name = None;
    let mut display_name = None;
    let mut version = None;
    let mut install_root = None;
    let mut mode = None;
    let mut reason = None;
    let mut files = Vec::new();
    let mut dependencies = Vec::new();
    let mut alias = None;
    let mut marker_state = None;
    let mut installed_at_unix = None;
    let mut updated_at_unix = None;

    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k.trim() {
            "name" => name = Some(v.to_string()),
            "display_name" => display_name = Some(v.to_string()),
            "version" => {
                version = Some(PackageVersion::parse(v).map_err(|err| anyhow!("{err}"))?)
            }
            "install_root" => install_root = Some(PathBuf::from(v)),
            "install_mode" => mode = Some(InstallMode::parse(v)?),
            "install_reason" => reason = Some(InstallReason::parse(v)?),
            "file" => files.push(v.to_string()),
            "dependency" => dependencies.push(parse_dependency(v)?),
            "alias" => {
                let (alias_name, target) = v
                    .split_once('\t')
                    .ok_or_else(|| anyhow!("invalid alias row format"))?;
                alias = Some(AliasBinding {
                    alias: alias_name.to_string(),
                    target: target.to_string(),
                });
            }
            "marker_state" => marker_state = Some(MarkerState::parse(v)?),
            "installed_at_unix" => {
                installed_at_unix = Some(v.parse().context("installed_at_unix must be u64")?)
            }
            "updated_at_unix" => {
                updated_at_unix = Some(v.parse().context("updated_at_unix must be u64")?)
            }
            _ => {}
        }
    }

    let name: String = name.context("missing name")?;
    let installed_at_unix = installed_at_unix.context("missing installed_at_unix")?;
    Ok(InstalledPackageRecord {
        display_name: display_name.unwrap_or_else(|| name.clone()),
        version: version.context("missing version")?,
        install_root: install_root.context("missing install_root")?,
        mode: mode.unwrap_or(InstallMode::Persistent),
        reason: reason.unwrap_or(InstallReason::Root),
        files,
        dependencies,
        alias,
        marker_state: marker_state.unwrap_or(MarkerState::None),
        installed_at_unix,
        updated_at_unix: updated_at_unix.unwrap_or(installed_at_unix),
        name,
    })
}

fn parse_dependency(value: &str) -> Result<ResolvedDependency> {
    let mut parts = value.splitn(3, '\t');
    let (Some(backend), Some(id)) = (parts.next(), parts.next()) else {
        return Err(anyhow!("invalid dependency row format"));
    };
    let backend =
        Backend::parse(backend).ok_or_else(|| anyhow!("unknown dependency backend: {backend}"))?;
    let installed_as = parts.next().unwrap_or(id);
    Ok(ResolvedDependency {
        backend,
        id: id.to_string(),
        installed_as: installed_as.to_string(),
    })
}
