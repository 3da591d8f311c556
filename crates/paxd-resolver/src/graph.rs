use std::collections::{BTreeMap, VecDeque};

use paxd_core::{ManifestError, PackageManifest};
use tracing::debug;

use crate::error::ResolveError;

/// Self-backend packages reachable from a root, keyed by package id.
/// Non-self dependencies stay inside each manifest as leaves.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    root: String,
    manifests: BTreeMap<String, PackageManifest>,
}

impl DependencyGraph {
    /// Expands the graph breadth-first from `root`, calling `load` at most
    /// once per package id.
    pub fn build<F>(
        root: &str,
        root_manifest: &PackageManifest,
        mut load: F,
    ) -> Result<Self, ResolveError>
    where
        F: FnMut(&str) -> anyhow::Result<Option<PackageManifest>>,
    {
        let mut manifests = BTreeMap::new();
        manifests.insert(root.to_string(), root_manifest.clone());

        let mut worklist = VecDeque::from([root.to_string()]);
        while let Some(requester) = worklist.pop_front() {
            let dependencies = match manifests.get(&requester) {
                Some(manifest) => manifest.self_dependencies().to_vec(),
                None => continue,
            };

            for dependency in dependencies {
                if manifests.contains_key(&dependency) {
                    continue;
                }

                debug!(package = %dependency, requester = %requester, "fetching dependency manifest");
                let manifest = match load(&dependency) {
                    Ok(Some(manifest)) => manifest,
                    Ok(None) => {
                        return Err(ResolveError::Unresolved {
                            missing: dependency,
                            requester,
                        })
                    }
                    Err(err) => return Err(lookup_error(dependency, requester, err)),
                };
                manifests.insert(dependency.clone(), manifest);
                worklist.push_back(dependency);
            }
        }

        Ok(Self {
            root: root.to_string(),
            manifests,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn manifest(&self, package_id: &str) -> Option<&PackageManifest> {
        self.manifests.get(package_id)
    }

    /// Direct self-backend dependencies in declaration order.
    pub fn edges(&self, package_id: &str) -> &[String] {
        self.manifests
            .get(package_id)
            .map(|manifest| manifest.self_dependencies())
            .unwrap_or(&[])
    }

    pub(crate) fn into_manifests(self) -> BTreeMap<String, PackageManifest> {
        self.manifests
    }
}

fn lookup_error(package_id: String, requester: String, err: anyhow::Error) -> ResolveError {
    match err.downcast::<ManifestError>() {
        Ok(source) => ResolveError::InvalidManifest { package_id, source },
        Err(err) => ResolveError::Lookup {
            package_id,
            requester,
            source: err.into(),
        },
    }
}
