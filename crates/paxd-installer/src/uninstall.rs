use std::fs;

use anyhow::Context;
use tracing::info;

use crate::alias::AliasRegistry;
use crate::error::InstallError;
use crate::ledger::Ledger;
use crate::types::{UninstallResult, UninstallStatus};

/// Removes an installed package unless another installed package still
/// depends on it. Holds the package lock for the whole removal.
pub fn uninstall_package(
    ledger: &Ledger,
    aliases: &dyn AliasRegistry,
    name: &str,
) -> Result<UninstallResult, InstallError> {
    let _lock = ledger.lock(name)?;
    let Some(record) = ledger.get(name)? else {
        return Ok(UninstallResult {
            name: name.to_string(),
            version: None,
            status: UninstallStatus::NotInstalled,
            blocked_by: Vec::new(),
        });
    };

    let blocked_by = ledger.dependents_of(name)?;
    if !blocked_by.is_empty() {
        return Ok(UninstallResult {
            name: name.to_string(),
            version: Some(record.version),
            status: UninstallStatus::BlockedByDependents,
            blocked_by,
        });
    }

    if let Some(alias) = &record.alias {
        aliases.unregister(&alias.alias, name)?;
    }
    if record.install_root.exists() {
        fs::remove_dir_all(&record.install_root).with_context(|| {
            format!(
                "failed to remove install root: {}",
                record.install_root.display()
            )
        })?;
    }
    ledger.remove(name)?;
    info!(package = name, version = %record.version, "uninstalled package");

    Ok(UninstallResult {
        name: name.to_string(),
        version: Some(record.version),
        status: UninstallStatus::Uninstalled,
        blocked_by: Vec::new(),
    })
}
