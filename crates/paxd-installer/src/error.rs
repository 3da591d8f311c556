use std::fmt;

use paxd_core::{Backend, ManifestError};
use paxd_resolver::ResolveError;
use thiserror::Error;

/// One backend dependency that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: Backend,
    pub id: String,
    pub reason: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.backend, self.id, self.reason)
    }
}

fn render_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("backend dependencies failed to install: {}", render_failures(failures))]
    Backend { failures: Vec<BackendFailure> },

    #[error("failed to stage '{path}' for package '{package_id}'")]
    FileStaging {
        package_id: String,
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to write {marker} marker for package '{package_id}'")]
    HookExecution {
        package_id: String,
        marker: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("command alias '{alias}' is already owned by package '{owner}'")]
    AliasConflict { alias: String, owner: String },

    #[error("package '{0}' does not support temporary (fastxd) runs")]
    FastxdUnsupported(String),

    #[error("package '{0}' declares no main executable to run")]
    NoMainExecutable(String),

    #[error("package '{0}' is being modified by another operation")]
    Busy(String),

    #[error("package '{0}' was not found in the registry")]
    PackageNotFound(String),

    #[error("package '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("package '{0}' is not installed")]
    NotInstalled(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to launch '{program}'")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InstallError {
    pub(crate) fn staging(
        package_id: &str,
        path: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::FileStaging {
            package_id: package_id.to_string(),
            path: path.to_string(),
            source: source.into(),
        }
    }
}
