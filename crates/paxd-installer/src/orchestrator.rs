use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use paxd_core::{Backend, PackageSource};
use paxd_resolver::{resolve_install_plan, InstallPlan, PlanLevel, PlannedPackage};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::alias::AliasRegistry;
use crate::backends::BackendSet;
use crate::error::{BackendFailure, InstallError};
use crate::fs_utils::current_unix_timestamp;
use crate::hooks::{pending_marker, write_marker};
use crate::layout::PrefixLayout;
use crate::ledger::{Ledger, PackageLock};
use crate::process::CancelToken;
use crate::staging::{stage_package, StageRequest, StagingJournal};
use crate::types::{
    AliasBinding, InstallMode, InstallReason, InstallReport, InstalledPackageRecord, MarkerState,
    ResolvedDependency, UninstallResult, UpdateOutcome, UpdatePolicy,
};
use crate::uninstall::uninstall_package;

/// Where an install lands and whether its records outlive the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    layout: PrefixLayout,
    mode: InstallMode,
}

impl InstallTarget {
    pub fn persistent(layout: PrefixLayout) -> Self {
        Self {
            layout,
            mode: InstallMode::Persistent,
        }
    }

    pub fn ephemeral(layout: PrefixLayout) -> Self {
        Self {
            layout,
            mode: InstallMode::Ephemeral,
        }
    }

    pub fn layout(&self) -> &PrefixLayout {
        &self.layout
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    pub fn persists_records(&self) -> bool {
        self.mode == InstallMode::Persistent
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub skip_checksum: bool,
}

pub struct Orchestrator<'a> {
    target: InstallTarget,
    ledger: Ledger,
    source: &'a dyn PackageSource,
    backends: &'a BackendSet,
    aliases: &'a dyn AliasRegistry,
    cancel: CancelToken,
    options: InstallOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        target: InstallTarget,
        source: &'a dyn PackageSource,
        backends: &'a BackendSet,
        aliases: &'a dyn AliasRegistry,
    ) -> Self {
        Self {
            ledger: Ledger::new(target.layout().clone()),
            target,
            source,
            backends,
            aliases,
            cancel: CancelToken::new(),
            options: InstallOptions::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(&self) -> &InstallTarget {
        &self.target
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Fetches `package_id` from the source and resolves its install plan.
    pub fn plan_for(&self, package_id: &str) -> Result<InstallPlan, InstallError> {
        let manifest = self
            .source
            .load_manifest(package_id)?
            .ok_or_else(|| InstallError::PackageNotFound(package_id.to_string()))?;
        Ok(resolve_install_plan(package_id, &manifest, |id| {
            self.source.load_manifest(id)
        })?)
    }

    pub fn install(&self, plan: &InstallPlan) -> Result<InstallReport, InstallError> {
        self.execute(plan, None)
    }

    /// Applies `plan` over the installed `record`. Versions that are not newer
    /// are left alone unless `policy` forces them.
    pub fn update(
        &self,
        record: &InstalledPackageRecord,
        plan: &InstallPlan,
        policy: UpdatePolicy,
    ) -> Result<UpdateOutcome, InstallError> {
        let manifest = plan
            .root_manifest()
            .ok_or_else(|| anyhow!("install plan for '{}' has no root package", plan.root))?;
        let installed = record.version;
        let available = manifest.version;

        if policy != UpdatePolicy::Force {
            match available.cmp(&installed) {
                Ordering::Equal => return Ok(UpdateOutcome::UpToDate(installed)),
                Ordering::Less => {
                    return Ok(UpdateOutcome::Downgrade {
                        installed,
                        available,
                    })
                }
                Ordering::Greater => {}
            }
        }

        let report = self.execute(plan, Some(record))?;
        Ok(UpdateOutcome::Updated {
            previous: installed,
            report,
        })
    }

    pub fn uninstall(&self, name: &str) -> Result<UninstallResult, InstallError> {
        uninstall_package(&self.ledger, self.aliases, name)
    }

    fn execute(
        &self,
        plan: &InstallPlan,
        previous: Option<&InstalledPackageRecord>,
    ) -> Result<InstallReport, InstallError> {
        let layout = self.target.layout();
        layout.ensure_base_dirs()?;

        let (plan, _locks) = if self.target.persists_records() {
            let root_lock = self.ledger.lock(&plan.root)?;
            if previous.is_none() && self.ledger.contains(&plan.root) {
                return Err(InstallError::AlreadyInstalled(plan.root.clone()));
            }
            let plan = plan.without_packages(|id| self.ledger.contains(id));
            let mut locks = vec![root_lock];
            for package in plan.packages() {
                if package.package_id != plan.root {
                    locks.push(self.ledger.lock(&package.package_id)?);
                }
            }
            (plan, locks)
        } else {
            (plan.clone(), Vec::<PackageLock>::new())
        };

        let attempt_dir = layout.attempt_dir(&attempt_id(&plan.root));
        info!(
            package = %plan.root,
            mode = self.target.mode().as_str(),
            packages = plan.packages().count(),
            "starting install attempt"
        );

        let mut journals = Vec::new();
        if let Err(err) = self.apply_levels(&plan, previous, &attempt_dir, &mut journals) {
            warn!(package = %plan.root, "install attempt failed, rolling back: {err}");
            rollback(journals, &attempt_dir);
            return Err(err);
        }

        let now = current_unix_timestamp();
        let mut issues = Vec::new();
        let mut fresh_aliases = Vec::new();
        let mut records = Vec::new();
        for (package, journal) in plan.packages().zip(journals.iter_mut()) {
            let package_previous = self.previous_for(&plan, package, previous);
            let install_root = self.install_root_for(&package.package_id, package_previous);
            let marker_state = self.write_lifecycle_marker(
                package,
                package_previous,
                &install_root,
                journal,
                &mut issues,
            );
            let alias = self.bind_alias(
                package,
                package_previous,
                &install_root,
                &mut issues,
                &mut fresh_aliases,
            );
            records.push(InstalledPackageRecord {
                name: package.package_id.clone(),
                display_name: package.manifest.name.clone(),
                version: package.manifest.version,
                install_root,
                mode: self.target.mode(),
                reason: match package_previous {
                    Some(record) => record.reason,
                    None if package.package_id == plan.root => InstallReason::Root,
                    None => InstallReason::Dependency,
                },
                files: package.manifest.install.files.clone(),
                dependencies: self.resolved_dependencies(&plan, package),
                alias,
                marker_state,
                installed_at_unix: package_previous.map_or(now, |record| record.installed_at_unix),
                updated_at_unix: now,
            });
        }

        if self.target.persists_records() {
            if let Err(err) = self.commit_records(&records, previous) {
                for (alias, package_id) in &fresh_aliases {
                    let _ = self.aliases.unregister(alias, package_id);
                }
                rollback(journals, &attempt_dir);
                return Err(err);
            }
        }

        for journal in journals {
            journal.commit();
        }
        let _ = fs::remove_dir_all(&attempt_dir);

        let root_index = records
            .iter()
            .position(|record| record.name == plan.root)
            .ok_or_else(|| anyhow!("install plan for '{}' has no root package", plan.root))?;
        let record = records.remove(root_index);
        info!(
            package = %record.name,
            version = %record.version,
            dependencies = records.len(),
            issues = issues.len(),
            "install committed"
        );
        Ok(InstallReport {
            record,
            dependencies: records,
            issues,
        })
    }

    fn apply_levels(
        &self,
        plan: &InstallPlan,
        previous: Option<&InstalledPackageRecord>,
        attempt_dir: &Path,
        journals: &mut Vec<StagingJournal>,
    ) -> Result<(), InstallError> {
        for level in &plan.levels {
            self.check_cancelled()?;
            self.install_backend_batches(level)?;
            self.check_cancelled()?;

            let staged: Vec<(StagingJournal, Result<(), InstallError>)> = level
                .packages
                .par_iter()
                .map(|package| {
                    let package_previous = self.previous_for(plan, package, previous);
                    let install_root =
                        self.install_root_for(&package.package_id, package_previous);
                    let mut journal = StagingJournal::new(attempt_dir.join(&package.package_id));
                    let request = StageRequest {
                        package_id: &package.package_id,
                        manifest: &package.manifest,
                        install_root: &install_root,
                        previous: package_previous,
                        skip_checksum: self.options.skip_checksum,
                    };
                    let result = stage_package(self.source, &request, &mut journal, &self.cancel);
                    (journal, result)
                })
                .collect();

            let mut first_error = None;
            for (journal, result) in staged {
                journals.push(journal);
                if let Err(err) = result {
                    first_error.get_or_insert(err);
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs every batch of the level to completion, then fails if any
    /// dependency failed.
    fn install_backend_batches(&self, level: &PlanLevel) -> Result<(), InstallError> {
        let mut failures = Vec::new();
        for batch in &level.backend_batches {
            info!(backend = %batch.backend, ids = ?batch.ids, depth = level.depth, "installing backend batch");
            let Some(installer) = self.backends.get(batch.backend) else {
                failures.extend(batch.ids.iter().map(|id| BackendFailure {
                    backend: batch.backend,
                    id: id.clone(),
                    reason: "no installer configured for this backend".to_string(),
                }));
                continue;
            };

            for (id, result) in installer.install(&batch.ids, &self.cancel) {
                if let Err(err) = result {
                    warn!(backend = %batch.backend, id = %id, "backend dependency failed: {err:#}");
                    failures.push(BackendFailure {
                        backend: batch.backend,
                        id,
                        reason: format!("{err:#}"),
                    });
                }
            }
        }

        self.check_cancelled()?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(InstallError::Backend { failures })
        }
    }

    fn write_lifecycle_marker(
        &self,
        package: &PlannedPackage,
        previous: Option<&InstalledPackageRecord>,
        install_root: &Path,
        journal: &mut StagingJournal,
        issues: &mut Vec<InstallError>,
    ) -> MarkerState {
        let prior = previous.map_or(MarkerState::None, |record| record.marker_state);
        let Some((marker, state)) = pending_marker(&package.manifest, previous.is_some()) else {
            return prior;
        };

        match write_marker(journal, install_root, marker) {
            Ok(path) => {
                debug!(package = %package.package_id, path = %path.display(), "wrote lifecycle marker");
                state
            }
            Err(source) => {
                warn!(package = %package.package_id, marker, "failed to write lifecycle marker: {source}");
                issues.push(InstallError::HookExecution {
                    package_id: package.package_id.clone(),
                    marker,
                    source,
                });
                prior
            }
        }
    }

    fn bind_alias(
        &self,
        package: &PlannedPackage,
        previous: Option<&InstalledPackageRecord>,
        install_root: &Path,
        issues: &mut Vec<InstallError>,
        fresh_aliases: &mut Vec<(String, String)>,
    ) -> Option<AliasBinding> {
        let package_id = package.package_id.as_str();
        if let Some(old) = previous.and_then(|record| record.alias.as_ref()) {
            if package.manifest.command_alias() != Some(old.alias.as_str()) {
                if let Err(err) = self.aliases.unregister(&old.alias, package_id) {
                    warn!(alias = %old.alias, package = package_id, "failed to release old alias: {err:#}");
                }
            }
        }

        let entry = package.manifest.install.entry_point.as_ref()?;
        let previously_owned = matches!(
            self.aliases.owner(&entry.command_alias),
            Ok(Some(owner)) if owner == package_id
        );
        let target = install_root.join(&entry.main_executable);
        match self
            .aliases
            .register(&entry.command_alias, package_id, &target)
        {
            Ok(()) => {
                if !previously_owned {
                    fresh_aliases.push((entry.command_alias.clone(), package_id.to_string()));
                }
                Some(AliasBinding {
                    alias: entry.command_alias.clone(),
                    target: entry.main_executable.clone(),
                })
            }
            Err(err) => {
                warn!(alias = %entry.command_alias, package = package_id, "alias not registered: {err}");
                issues.push(err);
                None
            }
        }
    }

    fn resolved_dependencies(
        &self,
        plan: &InstallPlan,
        package: &PlannedPackage,
    ) -> Vec<ResolvedDependency> {
        let mut resolved = Vec::new();
        for group in &package.manifest.install.dependencies {
            for id in &group.ids {
                let installed_as = if group.backend == Backend::Paxd {
                    self.installed_version_of(plan, id)
                        .map(|version| format!("{id}@{version}"))
                        .unwrap_or_else(|| id.clone())
                } else {
                    id.clone()
                };
                resolved.push(ResolvedDependency {
                    backend: group.backend,
                    id: id.clone(),
                    installed_as,
                });
            }
        }
        resolved
    }

    fn installed_version_of(&self, plan: &InstallPlan, package_id: &str) -> Option<String> {
        if let Some(planned) = plan
            .packages()
            .find(|planned| planned.package_id == package_id)
        {
            return Some(planned.manifest.version.to_string());
        }
        self.ledger
            .get(package_id)
            .ok()
            .flatten()
            .map(|record| record.version.to_string())
    }

    /// Dependencies first, root last, so the root record never names a
    /// dependency that has no record.
    fn commit_records(
        &self,
        records: &[InstalledPackageRecord],
        previous: Option<&InstalledPackageRecord>,
    ) -> Result<(), InstallError> {
        let mut written: Vec<&str> = Vec::new();
        for record in records {
            if let Err(err) = self.ledger.record(record) {
                for name in written {
                    let _ = self.ledger.remove(name);
                }
                if let Some(previous) = previous {
                    let _ = self.ledger.record(previous);
                }
                return Err(err.into());
            }
            written.push(&record.name);
        }
        Ok(())
    }

    fn previous_for<'r>(
        &self,
        plan: &InstallPlan,
        package: &PlannedPackage,
        previous: Option<&'r InstalledPackageRecord>,
    ) -> Option<&'r InstalledPackageRecord> {
        previous.filter(|_| package.package_id == plan.root)
    }

    fn install_root_for(
        &self,
        package_id: &str,
        previous: Option<&InstalledPackageRecord>,
    ) -> PathBuf {
        previous
            .map(|record| record.install_root.clone())
            .unwrap_or_else(|| self.target.layout().package_dir(package_id))
    }

    fn check_cancelled(&self) -> Result<(), InstallError> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        Ok(())
    }
}

fn rollback(journals: Vec<StagingJournal>, attempt_dir: &Path) {
    for journal in journals.into_iter().rev() {
        journal.rollback();
    }
    let _ = fs::remove_dir_all(attempt_dir);
}

fn attempt_id(package_id: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();
    format!("{package_id}-{}-{nanos}", std::process::id())
}
