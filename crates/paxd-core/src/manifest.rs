use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::backend::Backend;
use crate::error::ManifestError;
use crate::paths::{is_valid_alias, is_valid_backend_id, is_valid_package_id, validate_relative_path};
use crate::version::PackageVersion;

pub const FIRSTRUN_MARKER: &str = "FIRSTRUN";
pub const UPDATERUN_MARKER: &str = "UPDATERUN";

const CHECKSUM_SHA256_PREFIX: &str = "sha256:";

/// Manifest document as written by package authors, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<RawInstall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInstall {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Mapping,
    #[serde(default)]
    pub firstrun: bool,
    #[serde(default)]
    pub updaterun: bool,
    #[serde(default)]
    pub exclude_from_updates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_alias: Option<String>,
    #[serde(default)]
    pub supports_fastxd: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksum: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub name: String,
    pub author: String,
    pub version: PackageVersion,
    pub description: String,
    pub license: String,
    pub tags: BTreeSet<String>,
    pub install: InstallSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSpec {
    pub files: Vec<String>,
    pub dependencies: Vec<DependencyGroup>,
    pub firstrun: bool,
    pub updaterun: bool,
    pub exclude_from_updates: Vec<String>,
    pub entry_point: Option<EntryPoint>,
    pub supports_fastxd: bool,
    /// Lowercase SHA-256 hex digests keyed by `files` entry.
    pub checksums: BTreeMap<String, String>,
}

/// Dependencies declared under one backend key, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGroup {
    pub backend: Backend,
    pub ids: Vec<String>,
}

/// `main_executable` and `command_alias` only ever exist together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub main_executable: String,
    pub command_alias: String,
}

impl PackageManifest {
    pub fn from_yaml_str(input: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_yaml::from_str(input).map_err(|err| ManifestError::Parse(err.to_string()))?;
        validate(raw)
    }

    pub fn from_json_str(input: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_json::from_str(input).map_err(|err| ManifestError::Parse(err.to_string()))?;
        validate(raw)
    }

    pub fn to_raw(&self) -> RawManifest {
        let mut dependencies = Mapping::new();
        for group in &self.install.dependencies {
            dependencies.insert(
                Value::String(group.backend.as_str().to_string()),
                Value::Sequence(group.ids.iter().cloned().map(Value::String).collect()),
            );
        }

        RawManifest {
            name: Some(self.name.clone()),
            author: Some(self.author.clone()),
            version: Some(Value::String(self.version.to_string())),
            description: Some(self.description.clone()),
            license: Some(self.license.clone()),
            tags: self.tags.iter().cloned().collect(),
            install: Some(RawInstall {
                files: self.install.files.clone(),
                dependencies,
                firstrun: self.install.firstrun,
                updaterun: self.install.updaterun,
                exclude_from_updates: self.install.exclude_from_updates.clone(),
                main_executable: self
                    .install
                    .entry_point
                    .as_ref()
                    .map(|entry| entry.main_executable.clone()),
                command_alias: self
                    .install
                    .entry_point
                    .as_ref()
                    .map(|entry| entry.command_alias.clone()),
                supports_fastxd: self.install.supports_fastxd,
                checksum: self
                    .install
                    .checksums
                    .iter()
                    .map(|(path, digest)| {
                        (path.clone(), format!("{CHECKSUM_SHA256_PREFIX}{digest}"))
                    })
                    .collect(),
            }),
        }
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        serde_yaml::to_string(&self.to_raw())
            .with_context(|| format!("failed to serialize manifest '{}' as yaml", self.name))
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(&self.to_raw())
            .with_context(|| format!("failed to serialize manifest '{}' as json", self.name))
    }

    pub fn dependencies_for(&self, backend: Backend) -> &[String] {
        self.install
            .dependencies
            .iter()
            .find(|group| group.backend == backend)
            .map(|group| group.ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn self_dependencies(&self) -> &[String] {
        self.dependencies_for(Backend::Paxd)
    }

    /// Non-self dependency groups in declaration order.
    pub fn backend_dependencies(&self) -> impl Iterator<Item = &DependencyGroup> {
        self.install
            .dependencies
            .iter()
            .filter(|group| !group.backend.is_self())
    }

    pub fn main_executable(&self) -> Option<&str> {
        self.install
            .entry_point
            .as_ref()
            .map(|entry| entry.main_executable.as_str())
    }

    pub fn command_alias(&self) -> Option<&str> {
        self.install
            .entry_point
            .as_ref()
            .map(|entry| entry.command_alias.as_str())
    }

    pub fn is_excluded_from_updates(&self, path: &str) -> bool {
        self.install
            .exclude_from_updates
            .iter()
            .any(|excluded| excluded == path)
    }

    pub fn checksum_for(&self, path: &str) -> Option<&str> {
        self.install.checksums.get(path).map(String::as_str)
    }
}

/// Turns a raw document into a [`PackageManifest`], enforcing every
/// cross-field rule. Pure: never touches the filesystem or network.
pub fn validate(raw: RawManifest) -> Result<PackageManifest, ManifestError> {
    let name = raw.name.ok_or(ManifestError::MissingField("name"))?;
    if name.trim().is_empty() {
        return Err(ManifestError::EmptyField("name"));
    }
    let author = raw.author.ok_or(ManifestError::MissingField("author"))?;
    let description = raw
        .description
        .ok_or(ManifestError::MissingField("description"))?;
    let license = raw.license.ok_or(ManifestError::MissingField("license"))?;
    let version = match raw.version {
        None | Some(Value::Null) => return Err(ManifestError::MissingField("version")),
        Some(Value::String(text)) => PackageVersion::parse(&text)?,
        Some(other) => return Err(ManifestError::InvalidVersion(render_scalar(&other))),
    };

    let install = validate_install(raw.install.unwrap_or_default())?;

    Ok(PackageManifest {
        name,
        author,
        version,
        description,
        license,
        tags: raw.tags.into_iter().collect(),
        install,
    })
}

fn validate_install(raw: RawInstall) -> Result<InstallSpec, ManifestError> {
    let mut seen_files = HashSet::new();
    for file in &raw.files {
        validate_relative_path(file).map_err(|reason| ManifestError::InvalidPath {
            path: file.clone(),
            reason,
        })?;
        if !seen_files.insert(file.as_str()) {
            return Err(ManifestError::DuplicateFile(file.clone()));
        }
    }

    for excluded in &raw.exclude_from_updates {
        if !seen_files.contains(excluded.as_str()) {
            return Err(ManifestError::ExcludeNotInFiles(excluded.clone()));
        }
    }

    let entry_point = match (raw.main_executable, raw.command_alias) {
        (None, None) => None,
        (Some(main_executable), None) => {
            return Err(ManifestError::ExecutableWithoutAlias(main_executable))
        }
        (None, Some(command_alias)) => {
            return Err(ManifestError::AliasWithoutExecutable(command_alias))
        }
        (Some(main_executable), Some(command_alias)) => {
            validate_relative_path(&main_executable).map_err(|reason| {
                ManifestError::InvalidPath {
                    path: main_executable.clone(),
                    reason,
                }
            })?;
            if !seen_files.contains(main_executable.as_str()) {
                return Err(ManifestError::ExecutableNotInFiles(main_executable));
            }
            if !is_valid_alias(&command_alias) {
                return Err(ManifestError::InvalidAlias(command_alias));
            }
            Some(EntryPoint {
                main_executable,
                command_alias,
            })
        }
    };

    let mut checksums = BTreeMap::new();
    for (path, value) in raw.checksum {
        if !seen_files.contains(path.as_str()) {
            return Err(ManifestError::ChecksumNotInFiles(path));
        }
        let digest = parse_sha256_checksum(&path, &value)?;
        checksums.insert(path, digest);
    }

    Ok(InstallSpec {
        dependencies: validate_dependencies(raw.dependencies)?,
        files: raw.files,
        firstrun: raw.firstrun,
        updaterun: raw.updaterun,
        exclude_from_updates: raw.exclude_from_updates,
        entry_point,
        supports_fastxd: raw.supports_fastxd,
        checksums,
    })
}

fn validate_dependencies(raw: Mapping) -> Result<Vec<DependencyGroup>, ManifestError> {
    let mut groups = Vec::new();
    for (key, value) in raw {
        let key = match key {
            Value::String(key) => key,
            other => return Err(ManifestError::UnknownBackend(render_scalar(&other))),
        };
        let backend = Backend::parse(&key).ok_or(ManifestError::UnknownBackend(key))?;

        let entries = match value {
            Value::Null => Vec::new(),
            Value::Sequence(entries) => entries,
            other => {
                return Err(ManifestError::InvalidDependencyId {
                    backend: backend.to_string(),
                    id: render_scalar(&other),
                })
            }
        };

        let mut ids: Vec<String> = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = match entry {
                Value::String(id) => id,
                other => {
                    return Err(ManifestError::InvalidDependencyId {
                        backend: backend.to_string(),
                        id: render_scalar(&other),
                    })
                }
            };
            let valid = if backend.is_self() {
                is_valid_package_id(&id)
            } else {
                is_valid_backend_id(&id)
            };
            if !valid {
                return Err(ManifestError::InvalidDependencyId {
                    backend: backend.to_string(),
                    id,
                });
            }
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        groups.push(DependencyGroup { backend, ids });
    }
    Ok(groups)
}

fn parse_sha256_checksum(path: &str, value: &str) -> Result<String, ManifestError> {
    let invalid = |reason| ManifestError::InvalidChecksum {
        path: path.to_string(),
        reason,
    };
    let digest = value
        .trim()
        .strip_prefix(CHECKSUM_SHA256_PREFIX)
        .ok_or_else(|| invalid("expected 'sha256:<hex>'"))?;
    if digest.len() != 64 || !digest.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(invalid("sha256 digest must be 64 hex characters"));
    }
    Ok(digest.to_ascii_lowercase())
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Sequence(_) => "<sequence>".to_string(),
        Value::Mapping(_) => "<mapping>".to_string(),
        Value::Tagged(tagged) => format!("{}", tagged.tag),
    }
}
