use std::collections::HashSet;
use std::fmt;

use paxd_core::{Backend, PackageManifest};

/// A vertex of the dependency graph. The same identifier under two backends
/// names two unrelated packages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyNode {
    pub backend: Backend,
    pub id: String,
}

impl DependencyNode {
    pub fn new(backend: Backend, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
        }
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendBatch {
    pub backend: Backend,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPackage {
    pub package_id: String,
    pub manifest: PackageManifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanLevel {
    pub depth: usize,
    pub backend_batches: Vec<BackendBatch>,
    pub packages: Vec<PlannedPackage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    FirstRun,
    UpdateRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOperation {
    InstallBackendBatch {
        depth: usize,
        backend: Backend,
        ids: Vec<String>,
    },
    StageFiles {
        depth: usize,
        package_id: String,
        files: Vec<String>,
    },
    WriteMarker {
        depth: usize,
        package_id: String,
        event: LifecycleEvent,
    },
    RegisterAlias {
        depth: usize,
        package_id: String,
        alias: String,
        target: String,
    },
}

impl fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallBackendBatch { depth, backend, ids } => {
                write!(f, "[{depth}] {backend} install {}", ids.join(" "))
            }
            Self::StageFiles {
                depth,
                package_id,
                files,
            } => write!(f, "[{depth}] stage {package_id} ({} files)", files.len()),
            Self::WriteMarker {
                depth,
                package_id,
                event,
            } => {
                let marker = match event {
                    LifecycleEvent::FirstRun => paxd_core::FIRSTRUN_MARKER,
                    LifecycleEvent::UpdateRun => paxd_core::UPDATERUN_MARKER,
                };
                write!(f, "[{depth}] mark {package_id} {marker}")
            }
            Self::RegisterAlias {
                depth,
                package_id,
                alias,
                target,
            } => write!(f, "[{depth}] alias {alias} -> {package_id}/{target}"),
        }
    }
}

/// Levels run in order; everything a level's packages depend on lives in an
/// earlier level. The root package is always alone in the last level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub root: String,
    pub levels: Vec<PlanLevel>,
}

impl InstallPlan {
    /// Builds levels from packages already grouped by depth and in install
    /// order, scheduling each backend dependency at the first level needing it.
    pub fn from_levels(root: impl Into<String>, levels: Vec<(usize, Vec<PlannedPackage>)>) -> Self {
        let mut scheduled: HashSet<DependencyNode> = HashSet::new();
        let levels = levels
            .into_iter()
            .filter(|(_, packages)| !packages.is_empty())
            .map(|(depth, packages)| PlanLevel {
                depth,
                backend_batches: batches_for(&packages, &mut scheduled),
                packages,
            })
            .collect();

        Self {
            root: root.into(),
            levels,
        }
    }

    pub fn root_package(&self) -> Option<&PlannedPackage> {
        self.packages().find(|package| package.package_id == self.root)
    }

    pub fn root_manifest(&self) -> Option<&PackageManifest> {
        self.root_package().map(|package| &package.manifest)
    }

    /// Every package in install order, dependencies first.
    pub fn packages(&self) -> impl Iterator<Item = &PlannedPackage> {
        self.levels.iter().flat_map(|level| level.packages.iter())
    }

    pub fn install_order(&self) -> Vec<&str> {
        self.packages()
            .map(|package| package.package_id.as_str())
            .collect()
    }

    /// Drops non-root packages for which `skip` returns true, together with
    /// the backend dependencies only they required.
    pub fn without_packages<F>(&self, mut skip: F) -> Self
    where
        F: FnMut(&str) -> bool,
    {
        let levels = self
            .levels
            .iter()
            .map(|level| {
                let packages = level
                    .packages
                    .iter()
                    .filter(|package| package.package_id == self.root || !skip(&package.package_id))
                    .cloned()
                    .collect();
                (level.depth, packages)
            })
            .collect();
        Self::from_levels(self.root.clone(), levels)
    }

    pub fn operations(&self) -> Vec<PlanOperation> {
        let mut operations = Vec::new();
        for level in &self.levels {
            for batch in &level.backend_batches {
                operations.push(PlanOperation::InstallBackendBatch {
                    depth: level.depth,
                    backend: batch.backend,
                    ids: batch.ids.clone(),
                });
            }
            for package in &level.packages {
                let install = &package.manifest.install;
                operations.push(PlanOperation::StageFiles {
                    depth: level.depth,
                    package_id: package.package_id.clone(),
                    files: install.files.clone(),
                });
                for (requested, event) in [
                    (install.firstrun, LifecycleEvent::FirstRun),
                    (install.updaterun, LifecycleEvent::UpdateRun),
                ] {
                    if requested {
                        operations.push(PlanOperation::WriteMarker {
                            depth: level.depth,
                            package_id: package.package_id.clone(),
                            event,
                        });
                    }
                }
                if let Some(entry) = &install.entry_point {
                    operations.push(PlanOperation::RegisterAlias {
                        depth: level.depth,
                        package_id: package.package_id.clone(),
                        alias: entry.command_alias.clone(),
                        target: entry.main_executable.clone(),
                    });
                }
            }
        }
        operations
    }
}

fn batches_for(
    packages: &[PlannedPackage],
    scheduled: &mut HashSet<DependencyNode>,
) -> Vec<BackendBatch> {
    let mut batches: Vec<BackendBatch> = Vec::new();
    for package in packages {
        for group in package.manifest.backend_dependencies() {
            for id in &group.ids {
                if !scheduled.insert(DependencyNode::new(group.backend, id.clone())) {
                    continue;
                }
                match batches.iter_mut().find(|batch| batch.backend == group.backend) {
                    Some(batch) => batch.ids.push(id.clone()),
                    None => batches.push(BackendBatch {
                        backend: group.backend,
                        ids: vec![id.clone()],
                    }),
                }
            }
        }
    }
    batches
}
