use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::ManifestError;
use crate::manifest::{validate, PackageManifest, RawInstall, RawManifest};

/// File name of the pre-YAML manifest format: JSON with `//` line comments.
pub const LEGACY_MANIFEST_FILE_NAME: &str = "paxd";

#[derive(Debug, Default, Deserialize)]
struct LegacyManifest {
    #[serde(default)]
    pkg_info: LegacyPackageInfo,
    #[serde(default)]
    install: Option<LegacyInstall>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyPackageInfo {
    pkg_name: Option<String>,
    pkg_author: Option<String>,
    pkg_version: Option<Value>,
    pkg_description: Option<String>,
    pkg_license: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyInstall {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    depend: Vec<String>,
    #[serde(default)]
    firstrun: bool,
    #[serde(default)]
    updaterun: bool,
    mainfile: Option<String>,
    alias: Option<String>,
    #[serde(default)]
    checksum: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parses a legacy `pkg_info`/`install.include` manifest and validates it
    /// like any other document. Dependencies are `backend:id` strings.
    pub fn from_legacy_jsonc_str(input: &str) -> Result<Self, ManifestError> {
        let legacy: LegacyManifest = serde_json::from_str(&strip_line_comments(input))
            .map_err(|err| ManifestError::Parse(err.to_string()))?;
        validate(legacy.into_raw()?)
    }
}

impl LegacyManifest {
    fn into_raw(self) -> Result<RawManifest, ManifestError> {
        let info = self.pkg_info;
        let install = match self.install {
            Some(install) => Some(RawInstall {
                files: install.include,
                dependencies: group_dependencies(&install.depend)?,
                firstrun: install.firstrun,
                updaterun: install.updaterun,
                main_executable: install.mainfile,
                command_alias: install.alias,
                checksum: install.checksum,
                ..RawInstall::default()
            }),
            None => None,
        };
        Ok(RawManifest {
            name: info.pkg_name,
            author: info.pkg_author,
            version: info.pkg_version,
            description: info.pkg_description,
            license: info.pkg_license,
            tags: info.tags,
            install,
        })
    }
}

fn group_dependencies(entries: &[String]) -> Result<Mapping, ManifestError> {
    let mut groups = Mapping::new();
    for entry in entries {
        let Some((backend, id)) = entry.split_once(':') else {
            return Err(ManifestError::InvalidDependencyId {
                backend: "legacy".to_string(),
                id: entry.clone(),
            });
        };
        let key = Value::String(backend.trim().to_string());
        let id = Value::String(id.trim().to_string());
        match groups.get_mut(&key) {
            Some(Value::Sequence(ids)) => ids.push(id),
            _ => {
                groups.insert(key, Value::Sequence(vec![id]));
            }
        }
    }
    Ok(groups)
}

/// Drops `//` comments that start outside a string literal, line by line.
pub(crate) fn strip_line_comments(input: &str) -> String {
    input
        .lines()
        .map(|line| {
            let mut in_string = false;
            let mut escaped = false;
            let mut previous_slash = None;
            for (index, ch) in line.char_indices() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match ch {
                    '\\' if in_string => escaped = true,
                    '"' => in_string = !in_string,
                    '/' if !in_string => {
                        if previous_slash.is_some_and(|at| at + 1 == index) {
                            return line[..index - 1].trim_end();
                        }
                        previous_slash = Some(index);
                        continue;
                    }
                    _ => {}
                }
                previous_slash = None;
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
