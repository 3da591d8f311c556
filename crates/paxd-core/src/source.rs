use std::path::Path;

use anyhow::Result;

use crate::manifest::PackageManifest;

/// Where manifests and package files come from (the registry).
///
/// `load_manifest` returns `Ok(None)` when the registry has no package with
/// that id; transport failures are errors.
pub trait PackageSource: Send + Sync {
    fn load_manifest(&self, package_id: &str) -> Result<Option<PackageManifest>>;

    /// Writes `rel_path` of `package_id` to `destination`, creating nothing
    /// else. The destination's parent directory already exists.
    fn fetch_file(&self, package_id: &str, rel_path: &str, destination: &Path) -> Result<()>;
}
