use std::path::{Component, Path};

pub(crate) fn validate_relative_path(path: &str) -> Result<&Path, &'static str> {
    if path.trim().is_empty() {
        return Err("path must not be empty");
    }
    let relative = Path::new(path);
    if relative.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err("path must be relative");
    }
    for component in relative.components() {
        match component {
            Component::ParentDir => return Err("path must not include '..'"),
            Component::Prefix(_) | Component::RootDir => return Err("path must be relative"),
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    if path.ends_with('/') || path.ends_with('\\') {
        return Err("path must name a file");
    }
    Ok(relative)
}

/// Package ids become directory and file names under the prefix, so they are
/// restricted to a conservative character set.
pub fn is_valid_package_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.starts_with('-')
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
}

pub(crate) fn is_valid_alias(alias: &str) -> bool {
    is_valid_package_id(alias)
}

/// Backend identifiers are passed to external installers as a single argument.
pub(crate) fn is_valid_backend_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && !id.chars().any(|ch| ch.is_whitespace() || ch.is_control())
}
