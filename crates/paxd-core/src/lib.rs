mod backend;
mod error;
mod legacy;
mod manifest;
mod paths;
mod source;
mod version;

pub use backend::Backend;
pub use error::ManifestError;
pub use legacy::LEGACY_MANIFEST_FILE_NAME;
pub use manifest::{
    validate, DependencyGroup, EntryPoint, InstallSpec, PackageManifest, RawInstall, RawManifest,
    FIRSTRUN_MARKER, UPDATERUN_MARKER,
};
pub use paths::is_valid_package_id;
pub use source::PackageSource;
pub use version::PackageVersion;
