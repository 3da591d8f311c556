use std::path::PathBuf;

use anyhow::{anyhow, Result};
use paxd_core::{Backend, PackageVersion};
use serde::Serialize;

use crate::error::InstallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Persistent,
    Ephemeral,
}

impl InstallMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Ephemeral => "ephemeral",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self> {
        match value {
            "persistent" => Ok(Self::Persistent),
            "ephemeral" => Ok(Self::Ephemeral),
            _ => Err(anyhow!("invalid install_mode: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Root,
    Dependency,
}

impl InstallReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Dependency => "dependency",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self> {
        match value {
            "root" => Ok(Self::Root),
            "dependency" => Ok(Self::Dependency),
            _ => Err(anyhow!("invalid install_reason: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    None,
    FirstrunDone,
    UpdaterunDone,
}

impl MarkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FirstrunDone => "firstrun-done",
            Self::UpdaterunDone => "updaterun-done",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self> {
        match value {
            "none" => Ok(Self::None),
            "firstrun-done" => Ok(Self::FirstrunDone),
            "updaterun-done" => Ok(Self::UpdaterunDone),
            _ => Err(anyhow!("invalid marker_state: {value}")),
        }
    }
}

/// A dependency as it was satisfied. `installed_as` is the backend identifier
/// for external backends and `<id>@<version>` for self-backend packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
    pub backend: Backend,
    pub id: String,
    pub installed_as: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasBinding {
    pub alias: String,
    /// `main_executable`, relative to the install root.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackageRecord {
    /// Package id the package was installed under.
    pub name: String,
    pub display_name: String,
    pub version: PackageVersion,
    pub install_root: PathBuf,
    pub mode: InstallMode,
    pub reason: InstallReason,
    pub files: Vec<String>,
    pub dependencies: Vec<ResolvedDependency>,
    pub alias: Option<AliasBinding>,
    pub marker_state: MarkerState,
    pub installed_at_unix: u64,
    pub updated_at_unix: u64,
}

impl InstalledPackageRecord {
    pub fn self_dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|dependency| dependency.backend.is_self())
            .map(|dependency| dependency.id.as_str())
    }

    pub fn depends_on(&self, package_id: &str) -> bool {
        self.self_dependency_ids().any(|id| id == package_id)
    }
}

/// Result of a successful install or update. `issues` holds the failures
/// that did not undo the install (marker writes and alias conflicts).
#[derive(Debug)]
pub struct InstallReport {
    pub record: InstalledPackageRecord,
    pub dependencies: Vec<InstalledPackageRecord>,
    pub issues: Vec<InstallError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    #[default]
    NewerOnly,
    Force,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Updated {
        previous: PackageVersion,
        report: InstallReport,
    },
    UpToDate(PackageVersion),
    Downgrade {
        installed: PackageVersion,
        available: PackageVersion,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallStatus {
    NotInstalled,
    Uninstalled,
    BlockedByDependents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallResult {
    pub name: String,
    pub version: Option<PackageVersion>,
    pub status: UninstallStatus,
    pub blocked_by: Vec<String>,
}

/// What the vulnerability scanner reads for one installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEntry {
    pub name: String,
    pub version: String,
    pub backend_dependencies: Vec<ResolvedDependency>,
}
