use paxd_core::PackageManifest;
use tracing::debug;

use crate::error::ResolveError;
use crate::graph::DependencyGraph;
use crate::order::{assign_depths, dependency_first_order};
use crate::types::{InstallPlan, PlannedPackage};

/// Resolves the self-backend closure of `root_manifest` into a levelled
/// install plan. `load` fetches a manifest by package id and returns
/// `Ok(None)` when the registry has no such package.
pub fn resolve_install_plan<F>(
    root_id: &str,
    root_manifest: &PackageManifest,
    load: F,
) -> Result<InstallPlan, ResolveError>
where
    F: FnMut(&str) -> anyhow::Result<Option<PackageManifest>>,
{
    let graph = DependencyGraph::build(root_id, root_manifest, load)?;
    let ordered = dependency_first_order(&graph)?;
    let depths = assign_depths(&graph, &ordered);
    let level_count = depths.values().max().map_or(0, |depth| depth + 1);

    let mut manifests = graph.into_manifests();
    let mut levels: Vec<(usize, Vec<PlannedPackage>)> =
        (0..level_count).map(|depth| (depth, Vec::new())).collect();
    for package_id in ordered {
        let (Some(depth), Some(manifest)) = (depths.get(&package_id), manifests.remove(&package_id))
        else {
            continue;
        };
        levels[*depth].1.push(PlannedPackage {
            package_id,
            manifest,
        });
    }

    let plan = InstallPlan::from_levels(root_id, levels);
    debug!(
        root = root_id,
        packages = plan.packages().count(),
        levels = plan.levels.len(),
        "resolved install plan"
    );
    Ok(plan)
}
