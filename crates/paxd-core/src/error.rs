use thiserror::Error;

/// Reasons a manifest is rejected before any install work starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("invalid version '{0}': expected release.major.minor (e.g. 1.0.0)")]
    InvalidVersion(String),

    #[error("install.main_executable '{0}' is set but install.command_alias is missing")]
    ExecutableWithoutAlias(String),

    #[error("install.command_alias '{0}' is set but install.main_executable is missing")]
    AliasWithoutExecutable(String),

    #[error("install.main_executable '{0}' is not listed in install.files")]
    ExecutableNotInFiles(String),

    #[error("invalid command alias '{0}': only ASCII letters, digits, '-', '_' and '.' are allowed")]
    InvalidAlias(String),

    #[error("install.exclude_from_updates entry '{0}' is not listed in install.files")]
    ExcludeNotInFiles(String),

    #[error("install.files lists '{0}' more than once")]
    DuplicateFile(String),

    #[error("invalid install path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("unknown dependency backend '{0}': expected one of pip, winget, choco, npm, paxd")]
    UnknownBackend(String),

    #[error("invalid {backend} dependency identifier '{id}'")]
    InvalidDependencyId { backend: String, id: String },

    #[error("install.checksum entry '{0}' is not listed in install.files")]
    ChecksumNotInFiles(String),

    #[error("invalid checksum for '{path}': {reason}")]
    InvalidChecksum { path: String, reason: &'static str },
}
