use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::InstallError;
use crate::fs_utils::{remove_file_if_exists, write_atomic};
use crate::launch::Launcher;
use crate::layout::PrefixLayout;

/// Global command names bound to package executables.
pub trait AliasRegistry: Send + Sync {
    fn owner(&self, alias: &str) -> Result<Option<String>>;

    /// Binds `alias` to `target` for `package_id`. Rebinding an alias the
    /// package already owns replaces it; an alias owned by another package is
    /// an [`InstallError::AliasConflict`].
    fn register(&self, alias: &str, package_id: &str, target: &Path) -> Result<(), InstallError>;

    /// Releases `alias` if `package_id` owns it.
    fn unregister(&self, alias: &str, package_id: &str) -> Result<()>;
}

/// Writes forwarding shims into `<prefix>/bin` and records ownership under
/// `state/aliases`.
#[derive(Debug, Clone)]
pub struct ShimAliasRegistry {
    layout: PrefixLayout,
    launcher: Launcher,
}

impl ShimAliasRegistry {
    pub fn new(layout: PrefixLayout, launcher: Launcher) -> Self {
        Self { layout, launcher }
    }

    pub fn shim_path(&self, alias: &str) -> PathBuf {
        let mut file_name = alias.to_string();
        if cfg!(windows) {
            file_name.push_str(".cmd");
        }
        self.layout.bin_dir().join(file_name)
    }

    fn shim_contents(&self, target: &Path) -> String {
        let interpreter = self.launcher.interpreter_for(target);
        if cfg!(windows) {
            match interpreter {
                Some(program) => format!(
                    "@echo off\r\n\"{}\" \"{}\" %*\r\n",
                    program,
                    target.display()
                ),
                None => format!("@echo off\r\n\"{}\" %*\r\n", target.display()),
            }
        } else {
            let target = shell_quote(&target.display().to_string());
            match interpreter {
                Some(program) => format!(
                    "#!/bin/sh\nexec {} {} \"$@\"\n",
                    shell_quote(program),
                    target
                ),
                None => format!("#!/bin/sh\nexec {} \"$@\"\n", target),
            }
        }
    }
}

impl AliasRegistry for ShimAliasRegistry {
    fn owner(&self, alias: &str) -> Result<Option<String>> {
        let path = self.layout.alias_owner_path(alias);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let owner = raw.trim();
                Ok((!owner.is_empty()).then(|| owner.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read alias owner: {}", path.display()))
            }
        }
    }

    fn register(&self, alias: &str, package_id: &str, target: &Path) -> Result<(), InstallError> {
        if let Some(owner) = self.owner(alias)? {
            if owner != package_id {
                return Err(InstallError::AliasConflict {
                    alias: alias.to_string(),
                    owner,
                });
            }
        }

        for dir in [self.layout.bin_dir(), self.layout.aliases_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let owner_path = self.layout.alias_owner_path(alias);
        write_atomic(&owner_path, format!("{package_id}\n").as_bytes())?;

        let shim = self.shim_path(alias);
        write_atomic(&shim, self.shim_contents(target).as_bytes())
            .with_context(|| format!("failed to write shim: {}", shim.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&shim, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("failed to mark shim executable: {}", shim.display()))?;
        }

        debug!(alias, package = package_id, "alias registered");
        Ok(())
    }

    fn unregister(&self, alias: &str, package_id: &str) -> Result<()> {
        if self.owner(alias)?.as_deref() != Some(package_id) {
            return Ok(());
        }

        let shim = self.shim_path(alias);
        remove_file_if_exists(&shim)
            .with_context(|| format!("failed to remove shim: {}", shim.display()))?;
        let owner_path = self.layout.alias_owner_path(alias);
        remove_file_if_exists(&owner_path)
            .with_context(|| format!("failed to remove alias owner: {}", owner_path.display()))?;
        debug!(alias, package = package_id, "alias released");
        Ok(())
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Releases an alias when dropped.
pub(crate) struct AliasGuard<'a> {
    registry: &'a dyn AliasRegistry,
    alias: String,
    package_id: String,
}

impl<'a> AliasGuard<'a> {
    pub(crate) fn new(registry: &'a dyn AliasRegistry, alias: &str, package_id: &str) -> Self {
        Self {
            registry,
            alias: alias.to_string(),
            package_id: package_id.to_string(),
        }
    }
}

impl Drop for AliasGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.registry.unregister(&self.alias, &self.package_id) {
            tracing::warn!(alias = %self.alias, "failed to release alias: {err:#}");
        }
    }
}
