use paxd_core::ManifestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// `path` starts and ends with the same package id.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("package '{missing}' required by '{requester}' was not found in the registry")]
    Unresolved { missing: String, requester: String },

    #[error("manifest for '{package_id}' is invalid: {source}")]
    InvalidManifest {
        package_id: String,
        #[source]
        source: ManifestError,
    },

    #[error("failed to look up package '{package_id}' (required by '{requester}')")]
    Lookup {
        package_id: String,
        requester: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
